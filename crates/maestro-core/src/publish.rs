//! Bounded parallel publisher for the coordination store.
//!
//! Topology ingestion and attribute fan-out write thousands of small keys.
//! Doing that serially is slow; doing it unboundedly would oversubscribe the
//! store. The [`Publisher`] fans writes through a bounded worker pool
//! (default concurrency 500) and lets the producer wait on an error group
//! for completion: the first failed write is reported, the rest are joined.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::kv::KvStore;

/// Default maximum number of in-flight writes.
pub const DEFAULT_CONCURRENCY: usize = 500;

/// A handle that queues writes and joins them on [`Publisher::wait`].
pub struct Publisher {
    store: Arc<dyn KvStore>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<Result<()>>>,
}

impl Publisher {
    /// Creates a publisher with the default concurrency bound.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_concurrency(store, DEFAULT_CONCURRENCY)
    }

    /// Creates a publisher with an explicit concurrency bound.
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is zero.
    #[must_use]
    pub fn with_concurrency(store: Arc<dyn KvStore>, concurrency: usize) -> Self {
        assert!(concurrency > 0, "publisher concurrency must be positive");
        Self {
            store,
            permits: Arc::new(Semaphore::new(concurrency)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues a UTF-8 value write.
    ///
    /// Applies backpressure: when the pool is saturated this call waits for
    /// a permit before the write is queued.
    pub async fn store_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.store_bytes(key, Bytes::from(value.into())).await;
    }

    /// Queues a raw value write.
    pub async fn store_bytes(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let permit = permits.acquire_owned().await;
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            // Holds the permit for the duration of the write.
            let _permit = permit;
            store.set(&key, value).await
        });
    }

    /// Waits for all queued writes, returning the first error.
    ///
    /// # Errors
    ///
    /// Returns the first write error observed; remaining writes still run
    /// to completion before this returns.
    pub async fn wait(self) -> Result<()> {
        let mut tasks = self.tasks.into_inner();
        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Internal {
                            message: format!("publisher worker panicked: {e}"),
                        });
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[tokio::test]
    async fn publishes_all_queued_writes() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let publisher = Publisher::new(Arc::clone(&store));

        for i in 0..200 {
            publisher.store_string(format!("bulk/{i}"), "v").await;
        }
        publisher.wait().await.expect("wait");

        assert_eq!(store.list("bulk/").await.expect("list").len(), 200);
    }

    #[tokio::test]
    async fn bounded_concurrency_still_completes() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let publisher = Publisher::with_concurrency(Arc::clone(&store), 2);

        for i in 0..50 {
            publisher.store_string(format!("k/{i}"), format!("{i}")).await;
        }
        publisher.wait().await.expect("wait");

        assert_eq!(store.list("k/").await.expect("list").len(), 50);
    }

    #[tokio::test]
    async fn empty_publisher_waits_cleanly() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let publisher = Publisher::new(store);
        publisher.wait().await.expect("wait");
    }
}
