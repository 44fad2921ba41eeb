//! Leader election for cluster-wide single-owner services.
//!
//! The scheduled-action service must run on exactly one server at a time.
//! Election is lock acquisition on a sentinel key: whichever instance holds
//! the lock is the leader, and must renew before the lease expires or lose
//! leadership to the next acquirer.
//!
//! ## Design Principles
//!
//! - **Leases, not locks**: leadership is time-bounded, never indefinite
//! - **Heartbeat renewal**: leaders renew periodically or lose the lease
//! - **Graceful handoff**: leaders release on orderly shutdown for faster
//!   failover

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::kv::KvStore;
use crate::lock::{KvLock, LockGuard};

/// Result of a leadership acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    /// This instance is now the leader.
    Acquired,
    /// Leadership is held by another instance.
    NotLeader {
        /// Holder ID of the current leader, if known.
        current_leader: Option<String>,
    },
}

impl LeadershipResult {
    /// Returns true if leadership was acquired.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Lock-based leader elector.
///
/// One elector per service instance; the sentinel key identifies the
/// service whose leadership is being contested.
pub struct LeaderElector {
    lock: KvLock,
    lease_ttl: Duration,
    guard: Mutex<Option<LockGuard>>,
}

impl LeaderElector {
    /// Creates an elector contesting the given sentinel key.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, sentinel_key: impl Into<String>, lease_ttl: Duration) -> Self {
        Self {
            lock: KvLock::new(store, sentinel_key),
            lease_ttl,
            guard: Mutex::new(None),
        }
    }

    /// Attempts to acquire leadership without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentinel key could not be read or written.
    pub async fn try_acquire(&self) -> Result<LeadershipResult> {
        let mut guard = self.guard.lock().await;
        if guard.is_some() {
            return Ok(LeadershipResult::Acquired);
        }
        match self.lock.try_acquire(self.lease_ttl, Some("leader".into())).await? {
            Some(g) => {
                *guard = Some(g);
                Ok(LeadershipResult::Acquired)
            }
            None => {
                let current = self.lock.read_info().await?.map(|info| info.holder_id);
                Ok(LeadershipResult::NotLeader {
                    current_leader: current,
                })
            }
        }
    }

    /// Renews the lease. Returns false when leadership was lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentinel key could not be read or written.
    pub async fn renew(&self) -> Result<bool> {
        let mut guard = self.guard.lock().await;
        match guard.as_mut() {
            Some(g) => match g.extend(self.lease_ttl).await {
                Ok(()) => Ok(true),
                Err(_) => {
                    // Lease lost to another holder; drop our stale guard.
                    *guard = None;
                    Ok(false)
                }
            },
            None => Ok(false),
        }
    }

    /// Returns true if this instance currently believes it is the leader.
    pub async fn is_leader(&self) -> bool {
        self.guard.lock().await.is_some()
    }

    /// Voluntarily releases leadership for orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the release write failed; the lease will still
    /// expire via its TTL.
    pub async fn release(&self) -> Result<()> {
        let mut guard = self.guard.lock().await;
        if let Some(g) = guard.take() {
            g.release().await?;
        }
        Ok(())
    }

    /// Returns the holder ID of the current leader, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentinel key could not be read.
    pub async fn current_leader(&self) -> Result<Option<String>> {
        Ok(self
            .lock
            .read_info()
            .await?
            .filter(|info| !info.is_expired())
            .map(|info| info.holder_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    const KEY: &str = "scheduling/leader";

    #[tokio::test]
    async fn first_elector_wins() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));
        let b = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));

        assert!(a.try_acquire().await.expect("a").is_leader());
        let result = b.try_acquire().await.expect("b");
        assert!(!result.is_leader());
        assert!(matches!(
            result,
            LeadershipResult::NotLeader {
                current_leader: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn acquire_is_idempotent_for_the_leader() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));

        assert!(a.try_acquire().await.expect("first").is_leader());
        assert!(a.try_acquire().await.expect("second").is_leader());
        assert!(a.is_leader().await);
    }

    #[tokio::test]
    async fn release_hands_over_leadership() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));
        let b = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));

        assert!(a.try_acquire().await.expect("a").is_leader());
        a.release().await.expect("release");
        assert!(!a.is_leader().await);
        assert!(b.try_acquire().await.expect("b").is_leader());
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_millis(1));
        let b = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));

        assert!(a.try_acquire().await.expect("a").is_leader());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(b.try_acquire().await.expect("b").is_leader());
    }

    #[tokio::test]
    async fn renew_extends_the_lease() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));

        assert!(a.try_acquire().await.expect("a").is_leader());
        assert!(a.renew().await.expect("renew"));

        let leader = a.current_leader().await.expect("current");
        assert!(leader.is_some());
    }

    #[tokio::test]
    async fn renew_without_lease_reports_lost() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = LeaderElector::new(Arc::clone(&store), KEY, Duration::from_secs(30));
        assert!(!a.renew().await.expect("renew"));
    }
}
