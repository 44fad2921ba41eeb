//! The task dispatcher: from registered tasks to running workflows.
//!
//! The dispatcher watches the tasks subtree for `INITIAL` entries, claims
//! each through the validated `INITIAL -> RUNNING` transition, derives the
//! workflow to run from the task type, and finalises the task from the
//! executor's outcome. Deployment status follows the lifecycle task
//! (deploy, undeploy, purge) it is driven by.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use maestro_core::{DeploymentId, KvStore, TaskId};
use maestro_deployments::deployment::{self, DeploymentStatus};
use maestro_tasks::{paths as task_paths, TaskRegistry, TaskStatus, TaskType};

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::executor::{TaskOutcome, WorkflowExecutor};
use crate::planner;
use crate::scheduling::ActionScheduler;

/// How long a prefix watch blocks before re-scanning anyway.
const WATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Name of the lifecycle workflow driven by deploy-ish tasks.
const INSTALL_WORKFLOW: &str = "install";

/// Name of the lifecycle workflow driven by undeploy-ish tasks.
const UNINSTALL_WORKFLOW: &str = "uninstall";

/// Watches for schedulable tasks and drives them to completion.
pub struct TaskDispatcher {
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
    executor: WorkflowExecutor,
    scheduler: Arc<ActionScheduler>,
    shutdown_grace: Duration,
}

impl TaskDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        tasks: TaskRegistry,
        executor: WorkflowExecutor,
        scheduler: Arc<ActionScheduler>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            store,
            tasks,
            executor,
            scheduler,
            shutdown_grace,
        }
    }

    /// Runs the dispatch loop until the shutdown signal flips, then drains
    /// in-flight tasks for up to the shutdown grace period.
    ///
    /// Tasks abandoned past the grace period remain `RUNNING` in the store
    /// for the next leader to reconcile.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let prefix = format!("{}/", task_paths::TASKS_PREFIX);
        let mut wait_index = self.store.current_index().await.unwrap_or(0);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        while !*shutdown.borrow() {
            if let Err(err) = self.dispatch_pending(&mut in_flight, shutdown.clone()).await {
                tracing::warn!(error = %err, "task dispatch scan failed");
            }
            // Reap finished tasks without blocking.
            while in_flight.try_join_next().is_some() {}

            tokio::select! {
                watched = self.store.watch_prefix(&prefix, wait_index, WATCH_TIMEOUT) => {
                    match watched {
                        Ok(index) => wait_index = index,
                        Err(err) => {
                            tracing::warn!(error = %err, "task watch failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!(in_flight = in_flight.len(), "dispatcher shutting down");
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = in_flight.len(),
                        "graceful shutdown timeout exceeded, abandoning running tasks"
                    );
                    in_flight.abort_all();
                    break;
                }
            }
        }
    }

    /// Claims every schedulable task and spawns its processing.
    async fn dispatch_pending(
        &self,
        in_flight: &mut JoinSet<()>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let prefix = format!("{}/", task_paths::TASKS_PREFIX);
        for raw_id in self.store.child_names(&prefix).await? {
            let Ok(task_id) = raw_id.parse::<TaskId>() else {
                continue;
            };
            // A task may be purged between the listing and this read.
            let Ok(status) = self.tasks.get_task_status(&task_id).await else {
                continue;
            };
            if status != TaskStatus::Initial {
                continue;
            }
            // The validated transition is the claim: a concurrent claimer
            // loses with an invalid-transition error.
            if self
                .tasks
                .set_task_status(&task_id, TaskStatus::Running)
                .await
                .is_err()
            {
                continue;
            }

            let worker = self.clone_for_task();
            let shutdown = shutdown.clone();
            in_flight.spawn(async move {
                worker.process_task(task_id, shutdown).await;
            });
        }
        Ok(())
    }

    fn clone_for_task(&self) -> TaskWorker {
        TaskWorker {
            store: Arc::clone(&self.store),
            tasks: self.tasks.clone(),
            executor: self.executor.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

struct TaskWorker {
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
    executor: WorkflowExecutor,
    scheduler: Arc<ActionScheduler>,
}

impl TaskWorker {
    /// Processes one claimed task end to end.
    async fn process_task(&self, task_id: TaskId, shutdown: watch::Receiver<bool>) {
        let outcome = self.run_task(task_id, shutdown).await;
        let final_status = match outcome {
            Ok(TaskOutcome::Done) => TaskStatus::Done,
            Ok(TaskOutcome::Canceled) => TaskStatus::Canceled,
            Ok(TaskOutcome::Failed) => TaskStatus::Failed,
            Err(ref err) => {
                tracing::error!(task_id = %task_id, error = %err, "task processing failed");
                TaskStatus::Failed
            }
        };
        if let Err(err) = self.tasks.set_task_status(&task_id, final_status).await {
            tracing::error!(task_id = %task_id, error = %err, "failed to finalise task status");
        }
    }

    async fn run_task(
        &self,
        task_id: TaskId,
        shutdown: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        let deployment_id = self.tasks.get_task_target(&task_id).await?;
        let task_type = self.tasks.get_task_type(&task_id).await?;
        let span = maestro_core::observability::task_span(
            task_type.as_str(),
            deployment_id.as_str(),
            &task_id.to_string(),
        );

        // Cancellation: a watcher on the advisory flag feeds the signal
        // executors observe between steps; process shutdown feeds it too.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let flag_watcher = self.spawn_cancel_watcher(task_id, cancel_tx, shutdown);

        let result = tracing::Instrument::instrument(
            self.run_task_inner(task_id, task_type, &deployment_id, cancel_rx),
            span,
        )
        .await;
        flag_watcher.abort();
        result
    }

    fn spawn_cancel_watcher(
        &self,
        task_id: TaskId,
        cancel_tx: watch::Sender<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let flag_key = task_paths::canceled_flag_key(&task_id);
            let mut index = 0;
            loop {
                tokio::select! {
                    watched = store.get_watch(&flag_key, index, Duration::from_secs(10)) => {
                        match watched {
                            Ok((value, new_index)) => {
                                index = new_index;
                                if value.as_deref() == Some(b"true".as_slice()) {
                                    let _ = cancel_tx.send(true);
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(task_id = %task_id, error = %err, "cancellation watch failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            let _ = cancel_tx.send(true);
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn run_task_inner(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        deployment_id: &DeploymentId,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        match task_type {
            TaskType::Deploy | TaskType::ScaleOut | TaskType::AddNodes => {
                self.run_lifecycle_workflow(
                    task_id,
                    deployment_id,
                    INSTALL_WORKFLOW,
                    DeploymentStatus::DeploymentInProgress,
                    DeploymentStatus::Deployed,
                    cancel_rx,
                )
                .await
            }
            TaskType::UnDeploy | TaskType::ScaleIn | TaskType::RemoveNodes => {
                self.run_lifecycle_workflow(
                    task_id,
                    deployment_id,
                    UNINSTALL_WORKFLOW,
                    DeploymentStatus::UndeploymentInProgress,
                    DeploymentStatus::Undeployed,
                    cancel_rx,
                )
                .await
            }
            TaskType::Purge => {
                let outcome = self
                    .run_lifecycle_workflow(
                        task_id,
                        deployment_id,
                        UNINSTALL_WORKFLOW,
                        DeploymentStatus::UndeploymentInProgress,
                        DeploymentStatus::Undeployed,
                        cancel_rx,
                    )
                    .await?;
                if outcome == TaskOutcome::Done {
                    deployment::purge_deployment(Arc::clone(&self.store), deployment_id).await?;
                }
                Ok(outcome)
            }
            TaskType::CustomWorkflow | TaskType::CustomCommand => {
                let workflow_name = self.tasks.get_task_data(&task_id, "workflowName").await?;
                self.run_workflow(task_id, deployment_id, &workflow_name, cancel_rx)
                    .await
            }
            TaskType::Action => self.run_action(task_id, deployment_id, cancel_rx).await,
            TaskType::Query => Ok(TaskOutcome::Done),
        }
    }

    async fn run_lifecycle_workflow(
        &self,
        task_id: TaskId,
        deployment_id: &DeploymentId,
        workflow_name: &str,
        in_progress: DeploymentStatus,
        on_success: DeploymentStatus,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        deployment::set_deployment_status(self.store.as_ref(), deployment_id, in_progress).await?;
        let outcome = self
            .run_workflow(task_id, deployment_id, workflow_name, cancel_rx)
            .await?;
        let final_status = match outcome {
            TaskOutcome::Done => on_success,
            TaskOutcome::Failed | TaskOutcome::Canceled => DeploymentStatus::Failed,
        };
        deployment::set_deployment_status(self.store.as_ref(), deployment_id, final_status).await?;
        Ok(outcome)
    }

    async fn run_workflow(
        &self,
        task_id: TaskId,
        deployment_id: &DeploymentId,
        workflow_name: &str,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        let graph = planner::read_workflow(self.store.as_ref(), deployment_id, workflow_name).await?;
        let continue_on_error = self
            .tasks
            .get_task_data(&task_id, "continueOnError")
            .await
            .map(|v| v == "true")
            .unwrap_or(false);

        tracing::info!(
            task_id = %task_id,
            workflow = workflow_name,
            steps = graph.len(),
            continue_on_error,
            "running workflow"
        );
        self.executor
            .run_workflow(deployment_id, &task_id, &graph, continue_on_error, cancel_rx)
            .await
    }

    async fn run_action(
        &self,
        task_id: TaskId,
        deployment_id: &DeploymentId,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        let action_type = self.tasks.get_task_data(&task_id, "actionType").await?;
        let Some(handler) = self.scheduler.handler(&action_type) else {
            return Err(Error::NoExecutor {
                kind: "action type",
                key: action_type,
            });
        };

        let data_prefix = task_paths::data_prefix(&task_id);
        let mut action_data = std::collections::BTreeMap::new();
        for pair in self.store.list(&data_prefix).await? {
            let key = pair.key[data_prefix.len()..].to_string();
            let value = String::from_utf8(pair.value.to_vec())
                .map_err(|e| maestro_core::Error::serialization(format!("task data {key}: {e}")))?;
            action_data.insert(key, value);
        }

        let ctx = ExecutionContext::new(
            Arc::clone(&self.store),
            deployment_id.clone(),
            task_id,
            format!("action/{action_type}"),
            cancel_rx,
        );
        match handler.exec_action(&ctx, &action_data).await {
            Ok(()) => Ok(TaskOutcome::Done),
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "action execution failed");
                Ok(TaskOutcome::Failed)
            }
        }
    }
}
