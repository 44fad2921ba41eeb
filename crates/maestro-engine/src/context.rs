//! The execution context and executor contracts.
//!
//! Executors receive an explicit, typed context carrying only the
//! capabilities they may use: the store handle, the deployment and task
//! being worked on, the step name and the cooperative cancellation signal.
//! Infrastructure adapters implement [`DelegateExecutor`] (whole-lifecycle
//! provisioning) or [`OperationExecutor`] (single interface operations);
//! out-of-process plugins present the same traits over their RPC bridge.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use maestro_core::{DeploymentId, KvStore, TaskId};

use crate::error::Result;
use crate::inputs::EnvInput;

/// Context handed to executors for one step execution.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Coordination store handle for attribute and state writes.
    pub store: Arc<dyn KvStore>,
    /// The deployment being worked on.
    pub deployment_id: DeploymentId,
    /// The task driving this execution.
    pub task_id: TaskId,
    /// The step being executed.
    pub step_name: String,
    cancelled: watch::Receiver<bool>,
}

impl ExecutionContext {
    /// Creates a context bound to a cancellation signal.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        deployment_id: DeploymentId,
        task_id: TaskId,
        step_name: impl Into<String>,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            deployment_id,
            task_id,
            step_name: step_name.into(),
            cancelled,
        }
    }

    /// Returns true once the task's cancellation flag has been observed.
    ///
    /// Executors should check this between expensive stages; cancellation
    /// is cooperative and never preempts a step.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Returns a receiver executors can select on to react to
    /// cancellation mid-call.
    #[must_use]
    pub fn cancellation_signal(&self) -> watch::Receiver<bool> {
        self.cancelled.clone()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("deployment_id", &self.deployment_id)
            .field("task_id", &self.task_id)
            .field("step_name", &self.step_name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A resolved interface operation ready for dispatch.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation name as referenced by the workflow step (possibly
    /// interface-qualified, e.g. `Standard.start`).
    pub name: String,
    /// The node the operation runs against.
    pub node_name: String,
    /// The node type whose hierarchy carries the implementation.
    pub implemented_in_type: String,
    /// The implementation's primary artifact (script path, manifest, ...).
    pub primary: String,
    /// The implementation artifact kind used for executor lookup.
    pub artifact_kind: String,
}

/// Runs a node's whole lifecycle phase on an infrastructure provider.
#[async_trait]
pub trait DelegateExecutor: Send + Sync {
    /// The node types (or type prefixes) this executor supports.
    fn supported_types(&self) -> Vec<String>;

    /// Executes a delegate operation (`install`, `uninstall`, ...) for all
    /// of the node's instances the task selects.
    async fn exec_delegate(
        &self,
        ctx: &ExecutionContext,
        node_name: &str,
        delegate_operation: &str,
    ) -> Result<()>;
}

/// Runs a single interface operation (typically a script or manifest).
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// The implementation artifact kinds this executor supports.
    fn supported_artifacts(&self) -> Vec<String>;

    /// Executes the operation with the resolved per-instance inputs.
    ///
    /// `var_input_names` is the deduplicated, ordered list of shell-safe
    /// variable names; its ordering is part of the executor contract.
    async fn exec_operation(
        &self,
        ctx: &ExecutionContext,
        operation: &Operation,
        env_inputs: &[EnvInput],
        var_input_names: &[String],
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MemoryKvStore;

    #[test]
    fn context_reports_cancellation() {
        let (tx, rx) = watch::channel(false);
        let ctx = ExecutionContext::new(
            Arc::new(MemoryKvStore::new()),
            DeploymentId::new("dep-1").unwrap(),
            TaskId::generate(),
            "Compute_create",
            rx,
        );

        assert!(!ctx.is_cancelled());
        tx.send(true).expect("send");
        assert!(ctx.is_cancelled());
    }
}
