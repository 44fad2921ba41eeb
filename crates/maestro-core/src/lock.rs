//! Distributed advisory locks over the coordination store.
//!
//! Locks are how Maestro serialises host-pool connection updates, purge
//! operations and leader election. They use:
//! - **CAS acquisition**: a check-not-exists transaction, so only one writer
//!   can create the lock key
//! - **TTL**: time-bounded ownership so a crashed holder never deadlocks the
//!   cluster
//! - **Retry with backoff**: transient conflicts are retried with jittered
//!   exponential backoff up to a maximum acquisition wait
//!
//! # How It Works
//!
//! 1. Acquisition writes a lock key holding the holder ID and expiry time,
//!    guarded by check-not-exists
//! 2. If the key exists, the current record is read; an expired record is
//!    taken over with a check-index guard bound to the version that was read
//! 3. Release writes an expired record (never a blind delete, which could
//!    destroy a new holder's lock after a takeover)

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::kv::{KvStore, TxnOp, TxnOutcome};

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default maximum wait for lock acquisition.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Lock record contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique lock holder ID.
    pub holder_id: String,

    /// When the lock expires.
    pub expires_at: DateTime<Utc>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Optional description of the operation holding the lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    /// Creates a new lock record for the given holder and TTL.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.into(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
            acquired_at: now,
            operation: None,
        }
    }

    /// Returns whether this lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An advisory lock on a single store key.
///
/// Each lock instance gets a unique holder ID for identification.
pub struct KvLock {
    store: Arc<dyn KvStore>,
    lock_key: String,
    holder_id: String,
}

impl KvLock {
    /// Creates a new lock handle for the given key.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, lock_key: impl Into<String>) -> Self {
        Self {
            store,
            lock_key: lock_key.into(),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns the holder ID for this lock instance.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempts to acquire the lock, retrying up to `max_wait`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the lock is still held when
    /// the acquisition window closes.
    pub async fn acquire(&self, ttl: Duration, max_wait: Duration) -> Result<LockGuard> {
        self.acquire_with_operation(ttl, max_wait, None).await
    }

    /// Attempts to acquire the lock, recording an operation description.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the lock is still held when
    /// the acquisition window closes.
    pub async fn acquire_with_operation(
        &self,
        ttl: Duration,
        max_wait: Duration,
        operation: Option<String>,
    ) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut backoff = BACKOFF_BASE;

        loop {
            match self.try_acquire(ttl, operation.clone()).await? {
                Some(guard) => return Ok(guard),
                None => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::PreconditionFailed {
                            message: format!(
                                "lock {} still held after {:?}",
                                self.lock_key, max_wait
                            ),
                        });
                    }
                    let jitter = Duration::from_millis(clock_jitter());
                    tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Attempts to acquire the lock once. Returns `None` when it is held.
    ///
    /// # Errors
    ///
    /// Returns storage or serialization errors from the store.
    pub async fn try_acquire(
        &self,
        ttl: Duration,
        operation: Option<String>,
    ) -> Result<Option<LockGuard>> {
        let mut info = LockInfo::new(&self.holder_id, ttl);
        info.operation.clone_from(&operation);
        let record = encode(&info)?;

        let outcome = self
            .store
            .txn(vec![
                TxnOp::CheckNotExists {
                    key: self.lock_key.clone(),
                },
                TxnOp::Set {
                    key: self.lock_key.clone(),
                    value: record,
                },
            ])
            .await?;
        if outcome.is_committed() {
            return Ok(Some(self.guard()));
        }

        // Lock key exists. Read it bound to its modify index so takeover of
        // an expired record cannot race another acquirer.
        let pairs = self.store.list(&self.lock_key).await?;
        let Some(pair) = pairs.into_iter().find(|p| p.key == self.lock_key) else {
            // Disappeared between the txn and the read; next retry wins it.
            return Ok(None);
        };
        let existing: LockInfo = serde_json::from_slice(&pair.value)
            .map_err(|e| Error::serialization(format!("parse lock {}: {e}", self.lock_key)))?;
        if !existing.is_expired() {
            return Ok(None);
        }

        let mut takeover = LockInfo::new(&self.holder_id, ttl);
        takeover.operation = operation;
        let record = encode(&takeover)?;
        let outcome = self
            .store
            .txn(vec![
                TxnOp::CheckIndex {
                    key: self.lock_key.clone(),
                    index: pair.modify_index,
                },
                TxnOp::Set {
                    key: self.lock_key.clone(),
                    value: record,
                },
            ])
            .await?;
        if outcome.is_committed() {
            Ok(Some(self.guard()))
        } else {
            Ok(None)
        }
    }

    /// Checks if the lock is currently held (regardless of holder).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_info().await?.is_some_and(|info| !info.is_expired()))
    }

    /// Reads the current lock record without acquiring.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn read_info(&self) -> Result<Option<LockInfo>> {
        match self.store.get(&self.lock_key).await? {
            Some(bytes) => {
                let info: LockInfo = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::serialization(format!("parse lock {}: {e}", self.lock_key))
                })?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Forcefully breaks an existing lock (admin operation).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock key could not be deleted.
    pub async fn force_break(&self) -> Result<()> {
        self.store.delete(&self.lock_key).await
    }

    fn guard(&self) -> LockGuard {
        LockGuard {
            store: Arc::clone(&self.store),
            lock_key: self.lock_key.clone(),
            holder_id: self.holder_id.clone(),
            released: false,
        }
    }
}

/// Guard for a held lock.
///
/// Call [`LockGuard::release`] when done; an unreleased guard expires via
/// its TTL.
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    lock_key: String,
    holder_id: String,
    released: bool,
}

impl LockGuard {
    /// Returns the holder ID for this lock.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Explicitly releases the lock.
    ///
    /// Writes an expired record guarded by ownership; if another holder took
    /// over in the meantime their lock is left intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read or written.
    pub async fn release(mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if let Some(bytes) = self.store.get(&self.lock_key).await? {
            let info: LockInfo = serde_json::from_slice(&bytes)
                .map_err(|e| Error::serialization(format!("parse lock {}: {e}", self.lock_key)))?;
            if info.holder_id == self.holder_id {
                let expired = LockInfo {
                    holder_id: self.holder_id.clone(),
                    expires_at: Utc::now() - chrono::Duration::seconds(1),
                    acquired_at: info.acquired_at,
                    operation: None,
                };
                self.store.set(&self.lock_key, encode(&expired)?).await?;
            }
        }
        self.released = true;
        Ok(())
    }

    /// Extends the lock TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is no longer held by this guard.
    pub async fn extend(&mut self, additional_ttl: Duration) -> Result<()> {
        match self.store.get(&self.lock_key).await? {
            Some(bytes) => {
                let mut info: LockInfo = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::serialization(format!("parse lock {}: {e}", self.lock_key))
                })?;
                if info.holder_id != self.holder_id {
                    return Err(Error::PreconditionFailed {
                        message: format!("lock {} held by different holder", self.lock_key),
                    });
                }
                info.expires_at = Utc::now()
                    + chrono::Duration::from_std(additional_ttl)
                        .unwrap_or(chrono::Duration::seconds(30));
                self.store.set(&self.lock_key, encode(&info)?).await
            }
            None => Err(Error::NotFound(self.lock_key.clone())),
        }
    }
}

fn encode(info: &LockInfo) -> Result<Bytes> {
    let bytes =
        serde_json::to_vec(info).map_err(|e| Error::serialization(format!("encode lock: {e}")))?;
    Ok(Bytes::from(bytes))
}

/// Generates jitter for backoff (0-50ms) from the clock's sub-second noise.
fn clock_jitter() -> u64 {
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(MemoryKvStore::new())
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let store = store();
        let lock = KvLock::new(Arc::clone(&store), "locks/test");

        let guard = lock
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire");
        assert!(!guard.holder_id().is_empty());
        assert!(lock.is_locked().await.expect("check"));

        guard.release().await.expect("release");
        assert!(!lock.is_locked().await.expect("check"));
    }

    #[tokio::test]
    async fn second_acquisition_blocks() {
        let store = store();
        let lock1 = KvLock::new(Arc::clone(&store), "locks/test");
        let lock2 = KvLock::new(Arc::clone(&store), "locks/test");

        let _guard = lock1
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire1");

        let result = lock2
            .acquire(Duration::from_secs(30), Duration::from_millis(150))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let store = store();
        let lock1 = KvLock::new(Arc::clone(&store), "locks/test");
        let lock2 = KvLock::new(Arc::clone(&store), "locks/test");

        let guard1 = lock1
            .acquire(Duration::from_millis(1), Duration::from_secs(1))
            .await
            .expect("acquire1");

        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard2 = lock2
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire2");

        assert_ne!(guard1.holder_id(), guard2.holder_id());
        guard2.release().await.expect("release2");
    }

    #[tokio::test]
    async fn release_leaves_new_holder_intact() {
        let store = store();
        let lock1 = KvLock::new(Arc::clone(&store), "locks/test");
        let lock2 = KvLock::new(Arc::clone(&store), "locks/test");

        let guard1 = lock1
            .acquire(Duration::from_millis(1), Duration::from_secs(1))
            .await
            .expect("acquire1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _guard2 = lock2
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire2");

        // Stale guard releases after takeover; the new holder keeps the lock.
        guard1.release().await.expect("stale release");
        assert!(lock2.is_locked().await.expect("check"));
    }

    #[tokio::test]
    async fn extend_prolongs_ownership() {
        let store = store();
        let lock = KvLock::new(Arc::clone(&store), "locks/test");
        let mut guard = lock
            .acquire(Duration::from_secs(1), Duration::from_secs(1))
            .await
            .expect("acquire");

        guard.extend(Duration::from_secs(60)).await.expect("extend");
        let info = lock.read_info().await.expect("read").expect("present");
        assert!(info.expires_at > Utc::now() + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn lock_records_operation() {
        let store = store();
        let lock = KvLock::new(Arc::clone(&store), "locks/test");
        let _guard = lock
            .acquire_with_operation(
                Duration::from_secs(30),
                Duration::from_secs(1),
                Some("purge".into()),
            )
            .await
            .expect("acquire");

        let info = lock.read_info().await.expect("read").expect("present");
        assert_eq!(info.operation.as_deref(), Some("purge"));
    }

    #[tokio::test]
    async fn force_break_clears_lock() {
        let store = store();
        let lock = KvLock::new(Arc::clone(&store), "locks/test");
        let _guard = lock
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire");

        lock.force_break().await.expect("break");
        assert!(!lock.is_locked().await.expect("check"));
    }
}
