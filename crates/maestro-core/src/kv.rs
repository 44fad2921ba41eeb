//! Coordination store abstraction.
//!
//! The [`KvStore`] trait defines the hierarchical, transactional key/value
//! contract every Maestro component persists through. The contract matches
//! what production coordination backends (Consul, etcd) provide:
//!
//! - Hierarchical keys (`a/b/c`) with delimiter and recursive listing
//! - Atomic multi-key transactions with a bounded per-transaction op count
//! - Blocking watches keyed on a store-wide modify index
//!
//! ## Modify Index
//!
//! Every mutation bumps a store-wide modify index, and each key remembers the
//! index of its last change (including deletion). Watches are expressed as
//! "return once the observed index exceeds `wait_index`", which makes polling
//! loops race-free: a writer can never sneak a change in between a read and
//! the registration of the next watch.
//!
//! ## Thread Safety
//!
//! All methods are `Send + Sync` to support concurrent access from worker
//! pools and watchers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};

/// Maximum number of operations accepted in a single transaction.
///
/// Matches the bound of the production coordination backend; callers that
/// need more writes go through [`crate::publish::Publisher`] or accept
/// non-atomic chunking via [`Transaction::commit_batched`].
pub const MAX_TXN_OPS: usize = 64;

/// A key/value pair returned by recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Full key path.
    pub key: String,
    /// Stored value.
    pub value: Bytes,
    /// Modify index of the key's last change.
    pub modify_index: u64,
}

/// One operation inside a transaction.
#[derive(Debug, Clone)]
pub enum TxnOp {
    /// Sets a key to a value.
    Set {
        /// Key path.
        key: String,
        /// Value to store.
        value: Bytes,
    },
    /// Deletes a single key.
    Delete {
        /// Key path.
        key: String,
    },
    /// Deletes every key under a prefix.
    DeleteTree {
        /// Key prefix.
        prefix: String,
    },
    /// Fails the transaction if the key exists.
    CheckNotExists {
        /// Key path.
        key: String,
    },
    /// Fails the transaction unless the key's modify index matches.
    CheckIndex {
        /// Key path.
        key: String,
        /// Expected modify index.
        index: u64,
    },
}

impl TxnOp {
    /// Convenience constructor for a UTF-8 set operation.
    #[must_use]
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: Bytes::from(value.into()),
        }
    }
}

/// Result of a transaction.
///
/// Precondition failure is a normal outcome, not an error, so callers can
/// implement CAS loops without string-matching error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// All operations were applied atomically.
    Committed,
    /// A check operation failed; nothing was applied.
    Conflict {
        /// The key whose check failed.
        key: String,
    },
}

impl TxnOutcome {
    /// Returns true if the transaction was applied.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Coordination store contract.
///
/// Implementations must provide atomic transactions, prefix listing and
/// blocking watches. The in-memory implementation backs tests and single
/// process deployments; clustered backends live outside this crate.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Reads a single key.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Reads a single key as a UTF-8 string.
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await? {
            Some(bytes) => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::serialization(format!("key {key} is not UTF-8: {e}")))?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    /// Returns true if the key exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Blocks until the key's modify index exceeds `wait_index` or the
    /// timeout elapses, then returns the current value and index.
    ///
    /// A `wait_index` of zero returns immediately with the current state.
    async fn get_watch(
        &self,
        key: &str,
        wait_index: u64,
        timeout: Duration,
    ) -> Result<(Option<Bytes>, u64)>;

    /// Blocks until any key under `prefix` changes past `wait_index` or the
    /// timeout elapses, then returns the highest modify index under the
    /// prefix (or `wait_index` when nothing changed).
    async fn watch_prefix(&self, prefix: &str, wait_index: u64, timeout: Duration) -> Result<u64>;

    /// Sets a single key.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Deletes a single key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes every key under the prefix.
    async fn delete_tree(&self, prefix: &str) -> Result<()>;

    /// Lists the distinct child name segments directly under a prefix.
    ///
    /// For keys `a/b/x`, `a/b/y/z` and prefix `a/b/`, returns `["x", "y"]`,
    /// sorted. The prefix should end with `/`.
    async fn child_names(&self, prefix: &str) -> Result<Vec<String>>;

    /// Recursively lists all key/value pairs under a prefix, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;

    /// Atomically applies up to [`MAX_TXN_OPS`] operations.
    ///
    /// Check operations are evaluated first; if any fails, nothing is
    /// applied and the outcome names the conflicting key.
    async fn txn(&self, ops: Vec<TxnOp>) -> Result<TxnOutcome>;

    /// Returns the store-wide modify index.
    async fn current_index(&self) -> Result<u64>;
}

/// Builder for multi-key writes with transparent chunking.
///
/// Transactions that fit under [`MAX_TXN_OPS`] commit atomically; larger
/// batches of unconditional writes can be committed in chunks, which is
/// what bulk topology ingestion uses.
#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<TxnOp>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set operation.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(TxnOp::set(key, value));
        self
    }

    /// Adds a raw-bytes set operation.
    pub fn set_bytes(&mut self, key: impl Into<String>, value: Bytes) -> &mut Self {
        self.ops.push(TxnOp::Set {
            key: key.into(),
            value,
        });
        self
    }

    /// Adds a delete operation.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(TxnOp::Delete { key: key.into() });
        self
    }

    /// Adds a check-not-exists guard.
    pub fn check_not_exists(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(TxnOp::CheckNotExists { key: key.into() });
        self
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if no operations are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commits atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TxnTooLarge`] when the batch exceeds the store
    /// limit, or a storage error from the backend.
    pub async fn commit(self, store: &dyn KvStore) -> Result<TxnOutcome> {
        store.txn(self.ops).await
    }

    /// Commits in chunks of at most [`MAX_TXN_OPS`] operations.
    ///
    /// Chunks are not atomic with respect to each other, so this is only
    /// valid for unconditional writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the batch contains check
    /// operations, or a storage error from the backend.
    pub async fn commit_batched(self, store: &dyn KvStore) -> Result<()> {
        if self
            .ops
            .iter()
            .any(|op| matches!(op, TxnOp::CheckNotExists { .. } | TxnOp::CheckIndex { .. }))
        {
            return Err(Error::InvalidInput(
                "batched commit cannot carry check operations".to_string(),
            ));
        }
        let mut ops = self.ops;
        while !ops.is_empty() {
            let rest = ops.split_off(ops.len().min(MAX_TXN_OPS));
            let chunk = std::mem::replace(&mut ops, rest);
            store.txn(chunk).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct KeyState {
    /// `None` is a tombstone: the key was deleted at `modify_index`.
    value: Option<Bytes>,
    modify_index: u64,
}

/// In-memory coordination store.
///
/// Thread-safe, with full watch and transaction semantics. Backs tests and
/// single-node deployments; not durable across restarts.
#[derive(Debug)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<MemoryInner>>,
    notify_tx: watch::Sender<u64>,
}

#[derive(Debug)]
struct MemoryInner {
    entries: HashMap<String, KeyState>,
    index: u64,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        let (notify_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(MemoryInner {
                entries: HashMap::new(),
                index: 0,
            })),
            notify_tx,
        }
    }

    async fn mutate<F>(&self, f: F) -> Result<TxnOutcome>
    where
        F: FnOnce(&mut MemoryInner) -> TxnOutcome,
    {
        let new_index;
        let outcome;
        {
            let mut inner = self.inner.write().await;
            outcome = f(&mut inner);
            new_index = inner.index;
        }
        if outcome.is_committed() {
            // Receivers may all be gone; that's fine.
            let _ = self.notify_tx.send(new_index);
        }
        Ok(outcome)
    }
}

fn apply_set(inner: &mut MemoryInner, key: &str, value: Bytes) {
    inner.index += 1;
    let index = inner.index;
    inner.entries.insert(
        key.to_string(),
        KeyState {
            value: Some(value),
            modify_index: index,
        },
    );
}

fn apply_delete(inner: &mut MemoryInner, key: &str) {
    if inner
        .entries
        .get(key)
        .is_some_and(|state| state.value.is_some())
    {
        inner.index += 1;
        let index = inner.index;
        inner.entries.insert(
            key.to_string(),
            KeyState {
                value: None,
                modify_index: index,
            },
        );
    }
}

fn apply_delete_tree(inner: &mut MemoryInner, prefix: &str) {
    let keys: Vec<String> = inner
        .entries
        .iter()
        .filter(|(k, state)| k.starts_with(prefix) && state.value.is_some())
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        apply_delete(inner, &key);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(key)
            .and_then(|state| state.value.clone()))
    }

    async fn get_watch(
        &self,
        key: &str,
        wait_index: u64,
        timeout: Duration,
    ) -> Result<(Option<Bytes>, u64)> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.notify_tx.subscribe();
        loop {
            {
                let inner = self.inner.read().await;
                if let Some(state) = inner.entries.get(key) {
                    if state.modify_index > wait_index {
                        return Ok((state.value.clone(), state.modify_index));
                    }
                } else if wait_index == 0 {
                    return Ok((None, inner.index));
                }
            }
            let timed_out = tokio::time::timeout_at(deadline, rx.changed()).await;
            match timed_out {
                Ok(Ok(())) => {}
                // Channel closed or deadline reached: report current state.
                Ok(Err(_)) | Err(_) => {
                    let inner = self.inner.read().await;
                    let (value, index) = inner
                        .entries
                        .get(key)
                        .map_or((None, inner.index), |state| {
                            (state.value.clone(), state.modify_index)
                        });
                    return Ok((value, index));
                }
            }
        }
    }

    async fn watch_prefix(&self, prefix: &str, wait_index: u64, timeout: Duration) -> Result<u64> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.notify_tx.subscribe();
        loop {
            {
                let inner = self.inner.read().await;
                let max = inner
                    .entries
                    .iter()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(_, state)| state.modify_index)
                    .max()
                    .unwrap_or(0);
                if max > wait_index {
                    return Ok(max);
                }
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return Ok(wait_index),
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.mutate(|inner| {
            apply_set(inner, key, value);
            TxnOutcome::Committed
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|inner| {
            apply_delete(inner, key);
            TxnOutcome::Committed
        })
        .await
        .map(|_| ())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        self.mutate(|inner| {
            apply_delete_tree(inner, prefix);
            TxnOutcome::Committed
        })
        .await
        .map(|_| ())
    }

    async fn child_names(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, state)| k.starts_with(prefix) && state.value.is_some())
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                let segment = rest.split('/').next()?;
                if segment.is_empty() {
                    None
                } else {
                    Some(segment.to_string())
                }
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let inner = self.inner.read().await;
        let mut pairs: Vec<KvPair> = inner
            .entries
            .iter()
            .filter(|(k, state)| k.starts_with(prefix) && state.value.is_some())
            .map(|(k, state)| KvPair {
                key: k.clone(),
                value: state.value.clone().unwrap_or_default(),
                modify_index: state.modify_index,
            })
            .collect();
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pairs)
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> Result<TxnOutcome> {
        if ops.len() > MAX_TXN_OPS {
            return Err(Error::TxnTooLarge {
                op_count: ops.len(),
                limit: MAX_TXN_OPS,
            });
        }
        self.mutate(|inner| {
            // Evaluate all checks before applying anything.
            for op in &ops {
                match op {
                    TxnOp::CheckNotExists { key } => {
                        if inner
                            .entries
                            .get(key)
                            .is_some_and(|state| state.value.is_some())
                        {
                            return TxnOutcome::Conflict { key: key.clone() };
                        }
                    }
                    TxnOp::CheckIndex { key, index } => {
                        let current = inner.entries.get(key).map(|state| state.modify_index);
                        if current != Some(*index) {
                            return TxnOutcome::Conflict { key: key.clone() };
                        }
                    }
                    _ => {}
                }
            }
            for op in ops {
                match op {
                    TxnOp::Set { key, value } => apply_set(inner, &key, value),
                    TxnOp::Delete { key } => apply_delete(inner, &key),
                    TxnOp::DeleteTree { prefix } => apply_delete_tree(inner, &prefix),
                    TxnOp::CheckNotExists { .. } | TxnOp::CheckIndex { .. } => {}
                }
            }
            TxnOutcome::Committed
        })
        .await
    }

    async fn current_index(&self) -> Result<u64> {
        Ok(self.inner.read().await.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_exists() {
        let store = MemoryKvStore::new();
        store.set("a/b", Bytes::from("v1")).await.expect("set");

        assert_eq!(store.get("a/b").await.expect("get"), Some(Bytes::from("v1")));
        assert!(store.exists("a/b").await.expect("exists"));
        assert!(!store.exists("a/c").await.expect("exists"));
        assert_eq!(
            store.get_string("a/b").await.expect("get_string"),
            Some("v1".to_string())
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryKvStore::new();
        store.set("k", Bytes::from("v")).await.expect("set");
        store.delete("k").await.expect("delete");
        store.delete("k").await.expect("delete again");
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn child_names_lists_direct_children_only() {
        let store = MemoryKvStore::new();
        store.set("wf/steps/a/node", Bytes::from("n")).await.unwrap();
        store.set("wf/steps/b/node", Bytes::from("n")).await.unwrap();
        store
            .set("wf/steps/b/next/c", Bytes::from(""))
            .await
            .unwrap();

        let names = store.child_names("wf/steps/").await.expect("child_names");
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn list_is_recursive_and_sorted() {
        let store = MemoryKvStore::new();
        store.set("p/z", Bytes::from("1")).await.unwrap();
        store.set("p/a/b", Bytes::from("2")).await.unwrap();
        store.set("q/x", Bytes::from("3")).await.unwrap();

        let pairs = store.list("p/").await.expect("list");
        let keys: Vec<&str> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["p/a/b", "p/z"]);
    }

    #[tokio::test]
    async fn delete_tree_removes_subtree() {
        let store = MemoryKvStore::new();
        store.set("t/1/a", Bytes::from("x")).await.unwrap();
        store.set("t/1/b", Bytes::from("y")).await.unwrap();
        store.set("t/2/a", Bytes::from("z")).await.unwrap();

        store.delete_tree("t/1/").await.expect("delete_tree");
        assert!(store.get("t/1/a").await.unwrap().is_none());
        assert!(store.get("t/2/a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn txn_check_not_exists_conflicts() {
        let store = MemoryKvStore::new();
        store.set("guard", Bytes::from("held")).await.unwrap();

        let outcome = store
            .txn(vec![
                TxnOp::CheckNotExists {
                    key: "guard".to_string(),
                },
                TxnOp::set("other", "value"),
            ])
            .await
            .expect("txn");

        assert_eq!(
            outcome,
            TxnOutcome::Conflict {
                key: "guard".to_string()
            }
        );
        // Nothing applied.
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn txn_check_index_guards_cas() {
        let store = MemoryKvStore::new();
        store.set("k", Bytes::from("v1")).await.unwrap();
        let pairs = store.list("k").await.unwrap();
        let index = pairs[0].modify_index;

        let outcome = store
            .txn(vec![
                TxnOp::CheckIndex {
                    key: "k".to_string(),
                    index,
                },
                TxnOp::set("k", "v2"),
            ])
            .await
            .unwrap();
        assert!(outcome.is_committed());

        // Stale index now conflicts.
        let outcome = store
            .txn(vec![
                TxnOp::CheckIndex {
                    key: "k".to_string(),
                    index,
                },
                TxnOp::set("k", "v3"),
            ])
            .await
            .unwrap();
        assert!(!outcome.is_committed());
        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn txn_rejects_oversized_batch() {
        let store = MemoryKvStore::new();
        let ops: Vec<TxnOp> = (0..=MAX_TXN_OPS)
            .map(|i| TxnOp::set(format!("k/{i}"), "v"))
            .collect();
        let err = store.txn(ops).await.expect_err("should reject");
        assert!(matches!(err, Error::TxnTooLarge { .. }));
    }

    #[tokio::test]
    async fn transaction_commit_batched_chunks_large_writes() {
        let store = MemoryKvStore::new();
        let mut txn = Transaction::new();
        for i in 0..150 {
            txn.set(format!("bulk/{i}"), "v");
        }
        txn.commit_batched(&store).await.expect("batched");
        assert_eq!(store.list("bulk/").await.unwrap().len(), 150);
    }

    #[tokio::test]
    async fn watch_wakes_on_set() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("w", Bytes::from("v1")).await.unwrap();
        let (_, index) = store
            .get_watch("w", 0, Duration::from_millis(10))
            .await
            .unwrap();

        let watcher = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get_watch("w", index, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set("w", Bytes::from("v2")).await.unwrap();

        let (value, new_index) = watcher.await.expect("join").expect("watch");
        assert_eq!(value, Some(Bytes::from("v2")));
        assert!(new_index > index);
    }

    #[tokio::test]
    async fn watch_observes_deletion() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("w", Bytes::from("v1")).await.unwrap();
        let (_, index) = store
            .get_watch("w", 0, Duration::from_millis(10))
            .await
            .unwrap();

        let watcher = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get_watch("w", index, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.delete("w").await.unwrap();

        let (value, _) = watcher.await.expect("join").expect("watch");
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn watch_prefix_wakes_on_any_child() {
        let store = Arc::new(MemoryKvStore::new());
        let index = store.current_index().await.unwrap();

        let watcher = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .watch_prefix("tasks/", index, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set("tasks/t1/status", Bytes::from("0")).await.unwrap();

        let new_index = watcher.await.expect("join").expect("watch");
        assert!(new_index > index);
    }

    #[tokio::test]
    async fn watch_times_out_quietly() {
        let store = MemoryKvStore::new();
        let index = store.current_index().await.unwrap();
        let observed = store
            .watch_prefix("nothing/", index, Duration::from_millis(20))
            .await
            .expect("watch");
        assert_eq!(observed, index);
    }
}
