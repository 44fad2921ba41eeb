//! The task registry: CRUD and state machine for tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use maestro_core::{DeploymentId, KvStore, TaskId, Transaction, TxnOp};
use maestro_deployments::nodes;

use crate::error::{Error, Result};
use crate::paths;
use crate::status::{check_step_status_change, StepStatus, TaskStatus, TaskType};

/// A step's name and status, as exposed to the REST surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    /// Step name.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
}

/// Registry of tasks over the coordination store.
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn KvStore>,
}

impl TaskRegistry {
    /// Creates a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// Registers a task without extra data.
    ///
    /// # Errors
    ///
    /// See [`TaskRegistry::register_task_with_data`].
    pub async fn register_task(
        &self,
        target_id: &DeploymentId,
        task_type: TaskType,
    ) -> Result<TaskId> {
        self.register_task_with_data(target_id, task_type, BTreeMap::new())
            .await
    }

    /// Registers a task with string data entries.
    ///
    /// Fails with [`Error::AnotherLivingTaskAlreadyExists`] when the new
    /// task is blocking and a blocking task is alive on the same target.
    /// Data keys may be hierarchical (`inputs/user`, `nodes/compute`).
    ///
    /// # Errors
    ///
    /// Returns the living-task conflict or a storage error.
    pub async fn register_task_with_data(
        &self,
        target_id: &DeploymentId,
        task_type: TaskType,
        data: BTreeMap<String, String>,
    ) -> Result<TaskId> {
        if task_type.is_blocking() {
            if let Some((living_task_id, living_task_type)) =
                self.find_living_blocking_task(target_id).await?
            {
                return Err(Error::AnotherLivingTaskAlreadyExists {
                    living_task_id,
                    living_task_type: living_task_type.to_string(),
                    target_id: target_id.to_string(),
                });
            }
        }

        let task_id = TaskId::generate();

        // Data lands first, in chunks when large. The task only becomes
        // visible to the dispatcher with the final transaction that writes
        // the status key, so partially-written data is never observable.
        if !data.is_empty() {
            let mut txn = Transaction::new();
            for (key, value) in &data {
                txn.set(paths::data_key(&task_id, key), value.clone());
            }
            txn.commit_batched(self.store.as_ref()).await?;
        }

        self.store
            .txn(vec![
                TxnOp::set(paths::target_key(&task_id), target_id.to_string()),
                TxnOp::set(paths::type_key(&task_id), task_type.as_str()),
                TxnOp::set(paths::status_key(&task_id), TaskStatus::Initial.as_str()),
            ])
            .await?;

        tracing::debug!(task_id = %task_id, target_id = %target_id, task_type = %task_type, "task registered");
        Ok(task_id)
    }

    /// Returns true if the task exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn task_exists(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self.store.exists(&paths::status_key(task_id)).await?)
    }

    /// Reads a task's status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is absent.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let raw = self
            .store
            .get_string(&paths::status_key(task_id))
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        raw.parse()
    }

    /// Reads a task's type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is absent.
    pub async fn get_task_type(&self, task_id: &TaskId) -> Result<TaskType> {
        let raw = self
            .store
            .get_string(&paths::type_key(task_id))
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        raw.parse()
    }

    /// Reads a task's target deployment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is absent.
    pub async fn get_task_target(&self, task_id: &TaskId) -> Result<DeploymentId> {
        let raw = self
            .store
            .get_string(&paths::target_key(task_id))
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        Ok(DeploymentId::new_unchecked(raw))
    }

    /// Moves a task to a new status, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatusTransition`] on a forbidden move.
    pub async fn set_task_status(&self, task_id: &TaskId, target: TaskStatus) -> Result<()> {
        let current = self.get_task_status(task_id).await?;
        if !current.can_transition_to(target) {
            return Err(Error::InvalidStatusTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
        self.store
            .set(&paths::status_key(task_id), Bytes::from(target.as_str()))
            .await?;
        tracing::debug!(task_id = %task_id, from = %current, to = %target, "task status changed");
        Ok(())
    }

    /// Reads a task data entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is absent and
    /// [`Error::TaskDataNotFound`] when the task exists but the entry does
    /// not, so callers can fall back to defaults.
    pub async fn get_task_data(&self, task_id: &TaskId, key: &str) -> Result<String> {
        match self.store.get_string(&paths::data_key(task_id, key)).await? {
            Some(value) => Ok(value),
            None => {
                if self.task_exists(task_id).await? {
                    Err(Error::TaskDataNotFound {
                        task_id: *task_id,
                        key: key.to_string(),
                    })
                } else {
                    Err(Error::TaskNotFound { task_id: *task_id })
                }
            }
        }
    }

    /// Reads a task input (`data/inputs/<name>`).
    ///
    /// # Errors
    ///
    /// See [`TaskRegistry::get_task_data`].
    pub async fn get_task_input(&self, task_id: &TaskId, input_name: &str) -> Result<String> {
        self.get_task_data(task_id, &format!("inputs/{input_name}"))
            .await
    }

    /// Reads the task result set, when any.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn get_task_result_set(&self, task_id: &TaskId) -> Result<Option<String>> {
        Ok(self
            .store
            .get_string(&paths::result_set_key(task_id))
            .await?)
    }

    /// Writes the task result set.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn set_task_result_set(&self, task_id: &TaskId, result_set: &str) -> Result<()> {
        self.store
            .set(
                &paths::result_set_key(task_id),
                Bytes::from(result_set.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Lists the IDs of all tasks targeting a deployment.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn get_tasks_ids_for_target(
        &self,
        target_id: &DeploymentId,
    ) -> Result<Vec<TaskId>> {
        let prefix = format!("{}/", paths::TASKS_PREFIX);
        let mut ids = Vec::new();
        for name in self.store.child_names(&prefix).await? {
            let Ok(task_id) = name.parse::<TaskId>() else {
                continue;
            };
            let target = self.store.get_string(&paths::target_key(&task_id)).await?;
            if target.as_deref() == Some(target_id.as_str()) {
                ids.push(task_id);
            }
        }
        Ok(ids)
    }

    /// Returns the first living blocking task on a target, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn find_living_blocking_task(
        &self,
        target_id: &DeploymentId,
    ) -> Result<Option<(TaskId, TaskType)>> {
        for task_id in self.get_tasks_ids_for_target(target_id).await? {
            let status = self.get_task_status(&task_id).await?;
            if !status.is_living() {
                continue;
            }
            let task_type = self.get_task_type(&task_id).await?;
            if task_type.is_blocking() {
                return Ok(Some((task_id, task_type)));
            }
        }
        Ok(None)
    }

    /// Returns any living task on a target (blocking or not).
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn target_has_living_tasks(
        &self,
        target_id: &DeploymentId,
    ) -> Result<Option<(TaskId, TaskStatus)>> {
        for task_id in self.get_tasks_ids_for_target(target_id).await? {
            let status = self.get_task_status(&task_id).await?;
            if status.is_living() {
                return Ok(Some((task_id, status)));
            }
        }
        Ok(None)
    }

    /// Plants the advisory cancellation flag. Idempotent; never touches the
    /// task status directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when the task is absent.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        if !self.task_exists(task_id).await? {
            return Err(Error::TaskNotFound { task_id: *task_id });
        }
        self.store
            .set(&paths::canceled_flag_key(task_id), Bytes::from("true"))
            .await?;
        Ok(())
    }

    /// Returns true if the cancellation flag is planted.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn is_task_canceled(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self
            .store
            .get_string(&paths::canceled_flag_key(task_id))
            .await?
            .as_deref()
            == Some("true"))
    }

    /// Resumes a `FAILED` task: steps in `error` or `canceled` reset to
    /// `initial` and the task is re-armed to `INITIAL` in one transaction,
    /// making it schedulable again. Steps in `done` are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatusTransition`] unless the task is
    /// `FAILED`.
    pub async fn resume_task(&self, task_id: &TaskId) -> Result<()> {
        let current = self.get_task_status(task_id).await?;
        if current != TaskStatus::Failed {
            return Err(Error::InvalidStatusTransition {
                from: current.to_string(),
                to: TaskStatus::Initial.to_string(),
            });
        }

        let mut ops = vec![
            TxnOp::set(paths::status_key(task_id), TaskStatus::Initial.as_str()),
            TxnOp::Delete {
                key: paths::canceled_flag_key(task_id),
            },
        ];
        for step in self.get_task_related_steps(task_id).await? {
            if matches!(step.status, StepStatus::Error | StepStatus::Canceled) {
                ops.push(TxnOp::set(
                    paths::step_key(task_id, &step.name),
                    StepStatus::Initial.as_str(),
                ));
            }
        }
        if ops.len() <= maestro_core::MAX_TXN_OPS {
            self.store.txn(ops).await?;
        } else {
            // Very wide workflows: reset the steps first, re-arm the task
            // last so the dispatcher never picks it up half-reset.
            let rearm: Vec<TxnOp> = ops.drain(..2).collect();
            let mut steps_txn = Transaction::new();
            for op in ops {
                if let TxnOp::Set { key, value } = op {
                    steps_txn.set_bytes(key, value);
                }
            }
            steps_txn.commit_batched(self.store.as_ref()).await?;
            self.store.txn(rearm).await?;
        }
        tracing::debug!(task_id = %task_id, "task resumed");
        Ok(())
    }

    /// Registers the steps of a task, all `initial`.
    ///
    /// Steps already present keep their status, so resume never clobbers
    /// `done` steps.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn register_steps<I, S>(&self, task_id: &TaskId, step_names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut txn = Transaction::new();
        for name in step_names {
            let key = paths::step_key(task_id, name.as_ref());
            if !self.store.exists(&key).await? {
                txn.set(key, StepStatus::Initial.as_str());
            }
        }
        if !txn.is_empty() {
            txn.commit_batched(self.store.as_ref()).await?;
        }
        Ok(())
    }

    /// Lists the task's steps with their statuses.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store or an enum error on corrupt
    /// statuses.
    pub async fn get_task_related_steps(&self, task_id: &TaskId) -> Result<Vec<TaskStep>> {
        let prefix = paths::steps_prefix(task_id);
        let mut steps = Vec::new();
        for pair in self.store.list(&prefix).await? {
            let name = pair.key[prefix.len()..].to_string();
            let raw = String::from_utf8(pair.value.to_vec())
                .map_err(|e| maestro_core::Error::serialization(format!("step {name}: {e}")))?;
            steps.push(TaskStep {
                name,
                status: raw.parse()?,
            });
        }
        Ok(steps)
    }

    /// Returns a step's current status, or `None` when the step is absent.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn task_step_status(
        &self,
        task_id: &TaskId,
        step_name: &str,
    ) -> Result<Option<StepStatus>> {
        match self
            .store
            .get_string(&paths::step_key(task_id, step_name))
            .await?
        {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// Updates a step's status, validating the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StepNotFound`] for an unknown step and
    /// [`Error::InvalidStepTransition`] on a forbidden move.
    pub async fn update_task_step_status(
        &self,
        task_id: &TaskId,
        step_name: &str,
        target: StepStatus,
    ) -> Result<()> {
        let current = self
            .task_step_status(task_id, step_name)
            .await?
            .ok_or_else(|| Error::StepNotFound {
                task_id: *task_id,
                step_name: step_name.to_string(),
            })?;
        if !check_step_status_change(current, target) {
            return Err(Error::InvalidStepTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
        self.store
            .set(
                &paths::step_key(task_id, step_name),
                Bytes::from(target.as_str()),
            )
            .await?;
        Ok(())
    }

    /// Lists the nodes a task is scoped to (`data/nodes/<node>` entries).
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn get_task_related_nodes(&self, task_id: &TaskId) -> Result<Vec<String>> {
        let prefix = format!("{}nodes/", paths::data_prefix(task_id));
        Ok(self.store.child_names(&prefix).await?)
    }

    /// Returns true if the task is scoped to the given node.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn is_task_related_node(&self, task_id: &TaskId, node_name: &str) -> Result<bool> {
        Ok(self
            .get_task_related_nodes(task_id)
            .await?
            .iter()
            .any(|n| n == node_name))
    }

    /// Returns the instances a task operates on for a node: the task's
    /// explicit selection when present, otherwise every instance of the
    /// node.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn get_instances(
        &self,
        task_id: &TaskId,
        deployment_id: &DeploymentId,
        node_name: &str,
    ) -> Result<Vec<String>> {
        let key = format!("nodes/{node_name}");
        match self.store.get_string(&paths::data_key(task_id, &key)).await? {
            Some(selection) if !selection.is_empty() => Ok(selection
                .split(',')
                .map(|s| s.trim().to_string())
                .collect()),
            _ => Ok(nodes::get_node_instances_ids(
                self.store.as_ref(),
                deployment_id,
                node_name,
            )
            .await?),
        }
    }

    /// Removes a task's subtree.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<()> {
        self.store.delete_tree(&paths::task_prefix(task_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MemoryKvStore;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(MemoryKvStore::new()))
    }

    fn dep(id: &str) -> DeploymentId {
        DeploymentId::new(id).unwrap()
    }

    #[tokio::test]
    async fn register_and_read_back() {
        let registry = registry();
        let target = dep("dep-1");
        let mut data = BTreeMap::new();
        data.insert("workflowName".to_string(), "install".to_string());
        data.insert("inputs/user".to_string(), "admin".to_string());

        let task_id = registry
            .register_task_with_data(&target, TaskType::Deploy, data)
            .await
            .unwrap();

        assert!(registry.task_exists(&task_id).await.unwrap());
        assert_eq!(
            registry.get_task_status(&task_id).await.unwrap(),
            TaskStatus::Initial
        );
        assert_eq!(
            registry.get_task_type(&task_id).await.unwrap(),
            TaskType::Deploy
        );
        assert_eq!(registry.get_task_target(&task_id).await.unwrap(), target);
        assert_eq!(
            registry.get_task_input(&task_id, "user").await.unwrap(),
            "admin"
        );
    }

    #[tokio::test]
    async fn second_blocking_task_is_rejected() {
        let registry = registry();
        let target = dep("dep-1");
        let first = registry
            .register_task(&target, TaskType::Deploy)
            .await
            .unwrap();

        let err = registry
            .register_task(&target, TaskType::Deploy)
            .await
            .unwrap_err();
        assert!(err.is_another_living_task());
        assert!(err.to_string().contains(&first.to_string()));
    }

    #[tokio::test]
    async fn non_blocking_task_registers_alongside_blocking() {
        let registry = registry();
        let target = dep("dep-1");
        registry
            .register_task(&target, TaskType::Deploy)
            .await
            .unwrap();

        // A query doesn't block and isn't blocked.
        registry
            .register_task(&target, TaskType::Query)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dedup_releases_after_completion() {
        let registry = registry();
        let target = dep("dep-1");
        let first = registry
            .register_task(&target, TaskType::Deploy)
            .await
            .unwrap();
        registry
            .set_task_status(&first, TaskStatus::Running)
            .await
            .unwrap();
        registry
            .set_task_status(&first, TaskStatus::Done)
            .await
            .unwrap();

        registry
            .register_task(&target, TaskType::UnDeploy)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blocking_tasks_on_other_targets_do_not_interfere() {
        let registry = registry();
        registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();
        registry
            .register_task(&dep("dep-2"), TaskType::Deploy)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn status_transitions_are_validated() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();

        let err = registry
            .set_task_status(&task_id, TaskStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStatusTransition { .. }));

        registry
            .set_task_status(&task_id, TaskStatus::Running)
            .await
            .unwrap();
        registry
            .set_task_status(&task_id, TaskStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_plants_the_flag_and_is_idempotent() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();

        assert!(!registry.is_task_canceled(&task_id).await.unwrap());
        registry.cancel_task(&task_id).await.unwrap();
        registry.cancel_task(&task_id).await.unwrap();
        assert!(registry.is_task_canceled(&task_id).await.unwrap());

        // The flag never touches the status.
        assert_eq!(
            registry.get_task_status(&task_id).await.unwrap(),
            TaskStatus::Initial
        );
    }

    #[tokio::test]
    async fn task_data_not_found_is_distinguished() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();

        let err = registry.get_task_input(&task_id, "ghost").await.unwrap_err();
        assert!(err.is_task_data_not_found());

        let missing_task = TaskId::generate();
        let err = registry
            .get_task_input(&missing_task, "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn steps_lifecycle_and_validation() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();
        registry
            .register_steps(&task_id, ["create", "start"])
            .await
            .unwrap();

        let steps = registry.get_task_related_steps(&task_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == StepStatus::Initial));

        registry
            .update_task_step_status(&task_id, "create", StepStatus::Running)
            .await
            .unwrap();
        registry
            .update_task_step_status(&task_id, "create", StepStatus::Done)
            .await
            .unwrap();

        let err = registry
            .update_task_step_status(&task_id, "create", StepStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStepTransition { .. }));

        let err = registry
            .update_task_step_status(&task_id, "ghost", StepStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepNotFound { .. }));
    }

    #[tokio::test]
    async fn resume_resets_error_steps_only() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();
        registry
            .register_steps(&task_id, ["create", "start"])
            .await
            .unwrap();
        registry
            .set_task_status(&task_id, TaskStatus::Running)
            .await
            .unwrap();
        registry
            .update_task_step_status(&task_id, "create", StepStatus::Done)
            .await
            .unwrap();
        registry
            .update_task_step_status(&task_id, "start", StepStatus::Error)
            .await
            .unwrap();
        registry
            .set_task_status(&task_id, TaskStatus::Failed)
            .await
            .unwrap();

        registry.resume_task(&task_id).await.unwrap();

        assert_eq!(
            registry.get_task_status(&task_id).await.unwrap(),
            TaskStatus::Initial
        );
        assert_eq!(
            registry.task_step_status(&task_id, "create").await.unwrap(),
            Some(StepStatus::Done)
        );
        assert_eq!(
            registry.task_step_status(&task_id, "start").await.unwrap(),
            Some(StepStatus::Initial)
        );
    }

    #[tokio::test]
    async fn resume_requires_failed() {
        let registry = registry();
        let task_id = registry
            .register_task(&dep("dep-1"), TaskType::Deploy)
            .await
            .unwrap();

        let err = registry.resume_task(&task_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn instance_selection_falls_back_to_all_instances() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let registry = TaskRegistry::new(Arc::clone(&store));
        let target = dep("dep-1");

        for i in 0..2 {
            store
                .set(
                    &format!("_maestro/deployments/dep-1/topology/instances/web/{i}/state"),
                    Bytes::from("initial"),
                )
                .await
                .unwrap();
        }

        let mut data = BTreeMap::new();
        data.insert("nodes/db".to_string(), "0,2".to_string());
        let task_id = registry
            .register_task_with_data(&target, TaskType::CustomWorkflow, data)
            .await
            .unwrap();

        // Explicit selection for db.
        assert_eq!(
            registry.get_instances(&task_id, &target, "db").await.unwrap(),
            vec!["0", "2"]
        );
        // Fallback to topology for web.
        assert_eq!(
            registry.get_instances(&task_id, &target, "web").await.unwrap(),
            vec!["0", "1"]
        );

        assert_eq!(
            registry.get_task_related_nodes(&task_id).await.unwrap(),
            vec!["db"]
        );
        assert!(registry.is_task_related_node(&task_id, "db").await.unwrap());
        assert!(!registry.is_task_related_node(&task_id, "web").await.unwrap());
    }
}
