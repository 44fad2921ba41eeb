//! Scheduled actions: persistent, leader-owned recurring work.
//!
//! Long-running observation loops (job monitoring and friends) are not
//! allowed to poll in private sleep loops; they register a **scheduled
//! action** instead. Actions survive process restarts (they live in the
//! store) and exactly one server, the elected leader, arms a ticker per
//! action. Each tick injects a synthetic task of type `Action` carrying
//! the action's data, subject to the same registration policy as user
//! tasks.
//!
//! Unregistration is flag-based: [`unregister_action`] plants
//! `.unregisterFlag`, and the owning ticker removes the subtree on its
//! next tick. On leader change the new leader re-enumerates and re-arms;
//! missed ticks are not backfilled.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use maestro_core::{ActionId, DeploymentId, KvStore, LeaderElector, TaskId, TxnOp};
use maestro_tasks::{TaskRegistry, TaskType};

use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Root prefix for scheduled actions.
pub const SCHEDULING_PREFIX: &str = "_maestro/scheduling";

/// Sentinel key for scheduler leader election.
pub const SCHEDULER_LEADER_KEY: &str = "_maestro/scheduling/leader";

/// How often the leader loop re-elects and re-scans.
const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Lease TTL for scheduler leadership.
const LEADER_LEASE_TTL: Duration = Duration::from_secs(15);

fn action_prefix(action_id: &ActionId) -> String {
    format!("{SCHEDULING_PREFIX}/actions/{action_id}/")
}

/// A recurring action to be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Action type (e.g. `k8s-job-monitoring`), dispatched to the matching
    /// [`ActionHandler`].
    pub action_type: String,
    /// Arbitrary string data copied into every injected task.
    pub data: BTreeMap<String, String>,
}

/// Handles the execution of one action type's task ticks.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Executes one tick of the action.
    async fn exec_action(
        &self,
        ctx: &ExecutionContext,
        action_data: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Registers a scheduled action, transactionally.
///
/// # Errors
///
/// Returns [`Error::InvalidAction`] when the action type is empty, or a
/// storage error.
pub async fn register_action(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    interval: Duration,
    action: &Action,
) -> Result<ActionId> {
    if action.action_type.is_empty() {
        return Err(Error::InvalidAction {
            message: "actionType is a mandatory parameter".to_string(),
        });
    }

    let action_id = ActionId::generate();
    let prefix = action_prefix(&action_id);
    let mut ops = vec![
        TxnOp::set(format!("{prefix}deploymentID"), deployment_id.to_string()),
        TxnOp::set(format!("{prefix}type"), action.action_type.clone()),
        TxnOp::set(
            format!("{prefix}interval"),
            humantime::format_duration(interval).to_string(),
        ),
    ];
    for (key, value) in &action.data {
        ops.push(TxnOp::set(format!("{prefix}data/{key}"), value.clone()));
    }
    store.txn(ops).await.map_err(maestro_core::Error::from)?;

    tracing::debug!(action_id = %action_id, deployment_id = %deployment_id, action_type = %action.action_type, "scheduled action registered");
    Ok(action_id)
}

/// Flags a scheduled action for removal; the owning ticker observes the
/// flag on its next tick and removes the subtree.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn unregister_action(store: &dyn KvStore, action_id: &ActionId) -> Result<()> {
    store
        .set(
            &format!("{}.unregisterFlag", action_prefix(action_id)),
            bytes::Bytes::from("true"),
        )
        .await
        .map_err(Error::from)
}

struct ScheduledEntry {
    handle: JoinHandle<()>,
}

/// The scheduled-action service.
///
/// Run one instance per server; only the elected leader arms tickers.
pub struct ActionScheduler {
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
    elector: LeaderElector,
    handlers: Arc<std::sync::RwLock<HashMap<String, Arc<dyn ActionHandler>>>>,
    tickers: Mutex<HashMap<ActionId, ScheduledEntry>>,
}

impl ActionScheduler {
    /// Creates a scheduler over the store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, tasks: TaskRegistry) -> Self {
        let elector = LeaderElector::new(Arc::clone(&store), SCHEDULER_LEADER_KEY, LEADER_LEASE_TTL);
        Self {
            store,
            tasks,
            elector,
            handlers: Arc::new(std::sync::RwLock::new(HashMap::new())),
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the handler executing ticks of the given action type.
    ///
    /// # Panics
    ///
    /// Panics if the handler table lock is poisoned.
    pub fn register_handler(&self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers
            .write()
            .expect("handler table poisoned")
            .insert(action_type.into(), handler);
    }

    /// Returns the handler for an action type, if registered.
    ///
    /// # Panics
    ///
    /// Panics if the handler table lock is poisoned.
    #[must_use]
    pub fn handler(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .read()
            .expect("handler table poisoned")
            .get(action_type)
            .cloned()
    }

    /// Runs the scheduler loop until the shutdown signal flips.
    ///
    /// Each pass acquires or renews leadership, then reconciles tickers
    /// against the persisted actions. Losing leadership disarms all
    /// tickers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let leading = match self.elect_or_renew().await {
                Ok(leading) => leading,
                Err(err) => {
                    tracing::warn!(error = %err, "scheduler leader election failed");
                    false
                }
            };

            if leading {
                if let Err(err) = self.reconcile_tickers().await {
                    tracing::warn!(error = %err, "scheduled action reconciliation failed");
                }
            } else {
                self.disarm_all().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.disarm_all().await;
        if let Err(err) = self.elector.release().await {
            tracing::debug!(error = %err, "scheduler leadership release failed");
        }
    }

    async fn elect_or_renew(&self) -> Result<bool> {
        if self.elector.is_leader().await {
            if self.elector.renew().await? {
                return Ok(true);
            }
            tracing::info!("scheduler leadership lost");
            return Ok(false);
        }
        Ok(self.elector.try_acquire().await?.is_leader())
    }

    /// Arms tickers for actions that have none yet and reaps finished
    /// tickers.
    async fn reconcile_tickers(&self) -> Result<()> {
        let actions_prefix = format!("{SCHEDULING_PREFIX}/actions/");
        let ids = self.store.child_names(&actions_prefix).await?;

        let mut tickers = self.tickers.lock().await;
        tickers.retain(|_, entry| !entry.handle.is_finished());

        for raw_id in ids {
            let Ok(action_id) = raw_id.parse::<ActionId>() else {
                continue;
            };
            if tickers.contains_key(&action_id) {
                continue;
            }
            match self.arm_ticker(action_id).await {
                Ok(Some(entry)) => {
                    tickers.insert(action_id, entry);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(action_id = %action_id, error = %err, "failed to arm scheduled action");
                }
            }
        }
        Ok(())
    }

    async fn arm_ticker(&self, action_id: ActionId) -> Result<Option<ScheduledEntry>> {
        let prefix = action_prefix(&action_id);
        let Some(raw_interval) = self.store.get_string(&format!("{prefix}interval")).await? else {
            // Half-written or already-removed action; skip.
            return Ok(None);
        };
        let interval = humantime::parse_duration(&raw_interval).map_err(|e| Error::InvalidAction {
            message: format!("action {action_id} carries invalid interval {raw_interval:?}: {e}"),
        })?;

        let store = Arc::clone(&self.store);
        let tasks = self.tasks.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately; the
            // contract is "one tick per interval", so swallow it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match tick_action(store.as_ref(), &tasks, &action_id).await {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::Unregistered) => break,
                    Err(err) => {
                        tracing::warn!(action_id = %action_id, error = %err, "scheduled action tick failed");
                    }
                }
            }
        });
        Ok(Some(ScheduledEntry { handle }))
    }

    async fn disarm_all(&self) {
        let mut tickers = self.tickers.lock().await;
        for (_, entry) in tickers.drain() {
            entry.handle.abort();
        }
    }
}

enum TickOutcome {
    Continue,
    Unregistered,
}

/// Executes one tick: observe the unregister flag or inject a task.
async fn tick_action(
    store: &dyn KvStore,
    tasks: &TaskRegistry,
    action_id: &ActionId,
) -> Result<TickOutcome> {
    let prefix = action_prefix(action_id);

    if store
        .get_string(&format!("{prefix}.unregisterFlag"))
        .await?
        .as_deref()
        == Some("true")
    {
        store.delete_tree(&prefix).await?;
        tracing::debug!(action_id = %action_id, "scheduled action unregistered");
        return Ok(TickOutcome::Unregistered);
    }

    let Some(deployment_raw) = store.get_string(&format!("{prefix}deploymentID")).await? else {
        // Subtree vanished under us; stop ticking.
        return Ok(TickOutcome::Unregistered);
    };
    let deployment_id = DeploymentId::new_unchecked(deployment_raw);
    let action_type = store
        .get_string(&format!("{prefix}type"))
        .await?
        .unwrap_or_default();

    // One living task per action at a time: a slow tick must not pile up
    // behind itself.
    if let Some(task_id) = find_living_action_task(store, tasks, action_id, &deployment_id).await? {
        tracing::debug!(action_id = %action_id, task_id = %task_id, "previous action task still living, skipping tick");
        return Ok(TickOutcome::Continue);
    }

    let mut data = BTreeMap::new();
    data.insert("actionId".to_string(), action_id.to_string());
    data.insert("actionType".to_string(), action_type);
    let data_prefix = format!("{prefix}data/");
    for pair in store.list(&data_prefix).await? {
        let key = pair.key[data_prefix.len()..].to_string();
        let value = String::from_utf8(pair.value.to_vec())
            .map_err(|e| maestro_core::Error::serialization(format!("action data {key}: {e}")))?;
        data.insert(format!("data/{key}"), value);
    }

    let task_id = tasks
        .register_task_with_data(&deployment_id, TaskType::Action, data)
        .await?;
    tracing::debug!(action_id = %action_id, task_id = %task_id, "action task injected");
    Ok(TickOutcome::Continue)
}

async fn find_living_action_task(
    _store: &dyn KvStore,
    tasks: &TaskRegistry,
    action_id: &ActionId,
    deployment_id: &DeploymentId,
) -> Result<Option<TaskId>> {
    for task_id in tasks.get_tasks_ids_for_target(deployment_id).await? {
        if tasks.get_task_type(&task_id).await? != TaskType::Action {
            continue;
        }
        if !tasks.get_task_status(&task_id).await?.is_living() {
            continue;
        }
        match tasks.get_task_data(&task_id, "actionId").await {
            Ok(id) if id == action_id.to_string() => return Ok(Some(task_id)),
            Ok(_) => {}
            Err(err) if err.is_task_data_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MemoryKvStore;

    fn dep() -> DeploymentId {
        DeploymentId::new("dep-1").unwrap()
    }

    fn action() -> Action {
        let mut data = BTreeMap::new();
        data.insert("jobID".to_string(), "j1".to_string());
        Action {
            action_type: "k8s-job-monitoring".to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn registration_persists_the_action() {
        let store = MemoryKvStore::new();
        let action_id = register_action(&store, &dep(), Duration::from_secs(5), &action())
            .await
            .unwrap();

        let prefix = action_prefix(&action_id);
        assert_eq!(
            store.get_string(&format!("{prefix}type")).await.unwrap().as_deref(),
            Some("k8s-job-monitoring")
        );
        assert_eq!(
            store
                .get_string(&format!("{prefix}interval"))
                .await
                .unwrap()
                .as_deref(),
            Some("5s")
        );
        assert_eq!(
            store
                .get_string(&format!("{prefix}data/jobID"))
                .await
                .unwrap()
                .as_deref(),
            Some("j1")
        );
    }

    #[tokio::test]
    async fn registration_requires_an_action_type() {
        let store = MemoryKvStore::new();
        let result = register_action(
            &store,
            &dep(),
            Duration::from_secs(5),
            &Action {
                action_type: String::new(),
                data: BTreeMap::new(),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAction { .. })));
    }

    #[tokio::test]
    async fn tick_injects_an_action_task_with_data() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let tasks = TaskRegistry::new(Arc::clone(&store));
        let action_id = register_action(store.as_ref(), &dep(), Duration::from_secs(5), &action())
            .await
            .unwrap();

        let outcome = tick_action(store.as_ref(), &tasks, &action_id).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Continue));

        let ids = tasks.get_tasks_ids_for_target(&dep()).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(tasks.get_task_type(&ids[0]).await.unwrap(), TaskType::Action);
        assert_eq!(
            tasks.get_task_data(&ids[0], "data/jobID").await.unwrap(),
            "j1"
        );
        assert_eq!(
            tasks.get_task_data(&ids[0], "actionId").await.unwrap(),
            action_id.to_string()
        );
    }

    #[tokio::test]
    async fn tick_skips_while_previous_task_is_living() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let tasks = TaskRegistry::new(Arc::clone(&store));
        let action_id = register_action(store.as_ref(), &dep(), Duration::from_secs(5), &action())
            .await
            .unwrap();

        tick_action(store.as_ref(), &tasks, &action_id).await.unwrap();
        tick_action(store.as_ref(), &tasks, &action_id).await.unwrap();

        // The second tick observed the first (still INITIAL) task.
        assert_eq!(tasks.get_tasks_ids_for_target(&dep()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unregister_flag_removes_the_action_on_next_tick() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let tasks = TaskRegistry::new(Arc::clone(&store));
        let action_id = register_action(store.as_ref(), &dep(), Duration::from_secs(5), &action())
            .await
            .unwrap();

        unregister_action(store.as_ref(), &action_id).await.unwrap();
        let outcome = tick_action(store.as_ref(), &tasks, &action_id).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Unregistered));

        // Subtree removed, no task injected.
        assert!(store
            .child_names(&action_prefix(&action_id))
            .await
            .unwrap()
            .is_empty());
        assert!(tasks.get_tasks_ids_for_target(&dep()).await.unwrap().is_empty());
    }
}
