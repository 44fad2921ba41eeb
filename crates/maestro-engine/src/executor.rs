//! Workflow execution over a fixed-size worker pool.
//!
//! The executor walks a planned [`WorkflowGraph`]: a step becomes ready
//! when all of its predecessors completed, ready steps are picked up by a
//! bounded pool of workers, and a finishing worker enqueues its successors
//! and returns to the pool. Workers only ever block on store calls and
//! executor dispatch, never on each other.
//!
//! Failure policy: without `continue_on_error` the first `error` stops
//! scheduling; in-flight steps get `step_graceful_termination_timeout` to
//! finish before being marked `error`. With `continue_on_error` an errored
//! predecessor counts as satisfied and downstream steps still run; the
//! task still finalises `FAILED` when any step errored.
//!
//! Cancellation is cooperative: once the task's cancellation flag is
//! observed no new steps are scheduled, executors receive the signal (they
//! may ignore it) and in-flight steps get the same bounded grace period.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use maestro_core::{DeploymentId, KvStore, TaskId, Transaction, MAX_TXN_OPS};
use maestro_deployments::{nodes, paths as dep_paths, types, Activity, InstanceState};
use maestro_tasks::{StepStatus, TaskRegistry};

use crate::context::{ExecutionContext, Operation};
use crate::error::{Error, Result};
use crate::graph::{StepIndex, WorkflowGraph};
use crate::inputs;
use crate::registry::{artifact_kind_for_extension, ExecutorRegistry};

/// Final outcome of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every step completed successfully.
    Done,
    /// At least one step errored.
    Failed,
    /// The cancellation flag was observed.
    Canceled,
}

#[derive(Debug)]
enum StepOutcome {
    Done,
    Error(Error),
    Canceled,
}

/// Executes planned workflows against the store and executor registry.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
    registry: Arc<ExecutorRegistry>,
    workers: usize,
    step_graceful_termination_timeout: Duration,
}

impl WorkflowExecutor {
    /// Creates an executor with the given pool size and grace period.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        tasks: TaskRegistry,
        registry: Arc<ExecutorRegistry>,
        workers: usize,
        step_graceful_termination_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tasks,
            registry,
            workers: workers.max(1),
            step_graceful_termination_timeout,
        }
    }

    /// Runs a planned workflow to completion for a task.
    ///
    /// Steps already `done` in the task (a resumed run) are not
    /// re-executed; their successors are seeded as satisfied.
    ///
    /// # Errors
    ///
    /// Returns storage errors; step failures are reported through the
    /// returned [`TaskOutcome`], not as errors.
    pub async fn run_workflow(
        &self,
        deployment_id: &DeploymentId,
        task_id: &TaskId,
        graph: &WorkflowGraph,
        continue_on_error: bool,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TaskOutcome> {
        let step_names: Vec<&str> = graph.steps().iter().map(|s| s.name.as_str()).collect();
        self.tasks.register_steps(task_id, &step_names).await?;

        // Seed scheduling state, honouring steps already done (resume).
        let mut pending: Vec<usize> = graph.steps().iter().map(|s| s.ref_count).collect();
        let mut done: Vec<bool> = vec![false; graph.len()];
        for (idx, step) in graph.steps().iter().enumerate() {
            if self.tasks.task_step_status(task_id, &step.name).await? == Some(StepStatus::Done) {
                done[idx] = true;
            }
        }
        for (idx, step) in graph.steps().iter().enumerate() {
            if done[idx] {
                for &next in &step.next {
                    pending[next] = pending[next].saturating_sub(1);
                }
            }
        }

        let mut queue: VecDeque<StepIndex> = (0..graph.len())
            .filter(|&idx| {
                !done[idx] && pending[idx] == 0 && graph.step(idx).failure_ref_count == 0
            })
            .collect();

        let mut in_flight: JoinSet<(StepIndex, StepOutcome)> = JoinSet::new();
        let mut in_flight_steps: HashSet<StepIndex> = HashSet::new();
        let mut any_error = false;
        let mut canceled = *cancel.borrow();
        let mut stop_scheduling = canceled;

        loop {
            // Once scheduling stops, remaining in-flight work gets a
            // bounded drain below instead of an open-ended wait here.
            if stop_scheduling {
                break;
            }

            while in_flight.len() < self.workers {
                let Some(idx) = queue.pop_front() else { break };
                if done[idx] {
                    continue;
                }
                let runner = self.clone();
                let step = graph.step(idx).clone();
                let deployment_id = deployment_id.clone();
                let task_id = *task_id;
                let cancel_rx = cancel.clone();
                in_flight_steps.insert(idx);
                in_flight.spawn(async move {
                    let outcome = runner
                        .execute_step(&deployment_id, &task_id, &step, cancel_rx)
                        .await;
                    (idx, outcome)
                });
            }

            if in_flight.is_empty() {
                // The spawner drains the queue whenever the pool has room,
                // so an idle pool means there is nothing left to run.
                break;
            }

            tokio::select! {
                changed = cancel.changed(), if !canceled => {
                    if changed.is_ok() && *cancel.borrow() {
                        tracing::info!(task_id = %task_id, "cancellation observed, draining in-flight steps");
                        canceled = true;
                        stop_scheduling = true;
                    }
                }
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (idx, outcome) = joined.map_err(|e| maestro_core::Error::Internal {
                        message: format!("workflow worker panicked: {e}"),
                    })?;
                    in_flight_steps.remove(&idx);
                    match outcome {
                        StepOutcome::Done => {
                            done[idx] = true;
                            for &next in &graph.step(idx).next {
                                pending[next] = pending[next].saturating_sub(1);
                                if pending[next] == 0 && !done[next] {
                                    queue.push_back(next);
                                }
                            }
                        }
                        StepOutcome::Error(err) => {
                            any_error = true;
                            tracing::warn!(task_id = %task_id, step = %graph.step(idx).name, error = %err, "step failed");
                            // The failure branch runs regardless of policy.
                            for &failure in &graph.step(idx).on_failure {
                                if !done[failure] {
                                    queue.push_back(failure);
                                }
                            }
                            if continue_on_error {
                                // Errored predecessors satisfy joins.
                                for &next in &graph.step(idx).next {
                                    pending[next] = pending[next].saturating_sub(1);
                                    if pending[next] == 0 && !done[next] {
                                        queue.push_back(next);
                                    }
                                }
                            } else if graph.step(idx).on_failure.is_empty() {
                                stop_scheduling = true;
                            }
                        }
                        StepOutcome::Canceled => {
                            canceled = true;
                            stop_scheduling = true;
                        }
                    }
                }
            }
        }

        // Bounded drain of whatever is still in flight.
        if !in_flight.is_empty() {
            let abandoned = self
                .drain_in_flight(&mut in_flight, &mut in_flight_steps)
                .await?;
            if abandoned && !canceled {
                any_error = true;
            }
            for &idx in &in_flight_steps {
                let status = if canceled { StepStatus::Canceled } else { StepStatus::Error };
                let name = &graph.step(idx).name;
                if let Err(err) = self.tasks.update_task_step_status(task_id, name, status).await {
                    tracing::warn!(task_id = %task_id, step = %name, error = %err, "failed to finalise abandoned step");
                }
            }
        }

        if canceled {
            Ok(TaskOutcome::Canceled)
        } else if any_error {
            Ok(TaskOutcome::Failed)
        } else {
            Ok(TaskOutcome::Done)
        }
    }

    /// Joins remaining steps within the grace period; aborts past it.
    /// Returns true when steps were abandoned.
    async fn drain_in_flight(
        &self,
        in_flight: &mut JoinSet<(StepIndex, StepOutcome)>,
        in_flight_steps: &mut HashSet<StepIndex>,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.step_graceful_termination_timeout;
        loop {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(Ok((idx, _outcome)))) => {
                    in_flight_steps.remove(&idx);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "in-flight step worker failed during drain");
                }
                Ok(None) => return Ok(false),
                Err(_) => {
                    tracing::warn!(
                        abandoned = in_flight_steps.len(),
                        "graceful termination timeout exceeded, abandoning in-flight steps"
                    );
                    in_flight.abort_all();
                    while in_flight.join_next().await.is_some() {}
                    return Ok(true);
                }
            }
        }
    }

    /// Executes one step: mark running, run activities in order, mark the
    /// final status.
    async fn execute_step(
        &self,
        deployment_id: &DeploymentId,
        task_id: &TaskId,
        step: &crate::graph::Step,
        cancel: watch::Receiver<bool>,
    ) -> StepOutcome {
        if *cancel.borrow() {
            let _ = self
                .tasks
                .update_task_step_status(task_id, &step.name, StepStatus::Canceled)
                .await;
            return StepOutcome::Canceled;
        }

        if let Err(err) = self
            .tasks
            .update_task_step_status(task_id, &step.name, StepStatus::Running)
            .await
        {
            return StepOutcome::Error(err.into());
        }

        let ctx = ExecutionContext::new(
            Arc::clone(&self.store),
            deployment_id.clone(),
            *task_id,
            step.name.clone(),
            cancel,
        );

        for activity in &step.activities {
            if ctx.is_cancelled() {
                let _ = self
                    .tasks
                    .update_task_step_status(task_id, &step.name, StepStatus::Canceled)
                    .await;
                return StepOutcome::Canceled;
            }
            if let Err(err) = self.run_activity(&ctx, step, activity).await {
                let _ = self
                    .tasks
                    .update_task_step_status(task_id, &step.name, StepStatus::Error)
                    .await;
                return StepOutcome::Error(err);
            }
        }

        match self
            .tasks
            .update_task_step_status(task_id, &step.name, StepStatus::Done)
            .await
        {
            Ok(()) => StepOutcome::Done,
            Err(err) => StepOutcome::Error(err.into()),
        }
    }

    async fn run_activity(
        &self,
        ctx: &ExecutionContext,
        step: &crate::graph::Step,
        activity: &Activity,
    ) -> Result<()> {
        let node_name = step.node.as_deref().ok_or_else(|| {
            Error::step_failed(&step.name, format!("{} activity requires a node", activity.kind()))
        })?;

        match activity {
            Activity::SetState(state) => {
                let state: InstanceState = state
                    .parse()
                    .map_err(maestro_deployments::Error::from)?;
                self.set_state_for_instances(ctx, node_name, state).await
            }
            Activity::Delegate(delegate_operation) => {
                let node_type =
                    nodes::get_node_type(self.store.as_ref(), &ctx.deployment_id, node_name)
                        .await?;
                let executor = self.registry.delegate_executor(&node_type)?;
                tracing::debug!(step = %step.name, node = node_name, operation = %delegate_operation, "dispatching delegate");
                executor.exec_delegate(ctx, node_name, delegate_operation).await
            }
            Activity::CallOperation(operation_name) => {
                self.call_operation(ctx, node_name, operation_name).await
            }
            Activity::Inline(workflow) => Err(Error::step_failed(
                &step.name,
                format!("inline workflow {workflow} should have been expanded by the planner"),
            )),
        }
    }

    /// Updates all involved instances' state in one transaction.
    async fn set_state_for_instances(
        &self,
        ctx: &ExecutionContext,
        node_name: &str,
        state: InstanceState,
    ) -> Result<()> {
        let instances = self
            .tasks
            .get_instances(&ctx.task_id, &ctx.deployment_id, node_name)
            .await?;
        let mut txn = Transaction::new();
        for instance in &instances {
            txn.set(
                dep_paths::instance_state_key(&ctx.deployment_id, node_name, instance),
                state.as_str(),
            );
        }
        if txn.is_empty() {
            return Ok(());
        }
        if txn.len() <= MAX_TXN_OPS {
            txn.commit(self.store.as_ref()).await?;
        } else {
            txn.commit_batched(self.store.as_ref()).await?;
        }
        tracing::debug!(node = node_name, state = %state, instances = instances.len(), "instance states updated");
        Ok(())
    }

    async fn call_operation(
        &self,
        ctx: &ExecutionContext,
        node_name: &str,
        operation_name: &str,
    ) -> Result<()> {
        let node_type =
            nodes::get_node_type(self.store.as_ref(), &ctx.deployment_id, node_name).await?;
        let (primary, explicit_kind) = types::get_operation_implementation(
            self.store.as_ref(),
            &ctx.deployment_id,
            &node_type,
            operation_name,
        )
        .await?
        .ok_or_else(|| Error::MissingImplementation {
            operation: operation_name.to_string(),
            type_name: node_type.clone(),
        })?;

        let artifact_kind = match explicit_kind {
            Some(kind) => kind,
            None => artifact_kind_for_extension(&primary)
                .ok_or_else(|| Error::NoExecutor {
                    kind: "artifact",
                    key: primary.clone(),
                })?
                .to_string(),
        };

        let operation = Operation {
            name: operation_name.to_string(),
            node_name: node_name.to_string(),
            implemented_in_type: node_type,
            primary,
            artifact_kind: artifact_kind.clone(),
        };

        let (env_inputs, var_input_names) = inputs::resolve_inputs(
            self.store.as_ref(),
            &ctx.deployment_id,
            node_name,
            &ctx.task_id,
            &self.tasks,
            &operation,
            None,
        )
        .await?;

        let executor = self.registry.operation_executor(&artifact_kind)?;
        tracing::debug!(node = node_name, operation = operation_name, artifact = %artifact_kind, "dispatching operation");
        executor
            .exec_operation(ctx, &operation, &env_inputs, &var_input_names)
            .await
    }
}
