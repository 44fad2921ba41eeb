//! Error types for the engine.

/// The result type used throughout maestro-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur planning or executing workflows.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in a workflow graph.
    #[error("cycle detected in workflow {workflow_name}: involves step {step_name}")]
    CycleDetected {
        /// The workflow being planned.
        workflow_name: String,
        /// A step on the cycle.
        step_name: String,
    },

    /// A step references an unknown successor.
    #[error("step {step_name} references unknown step {next_step} in workflow {workflow_name}")]
    UnknownStep {
        /// The workflow being planned.
        workflow_name: String,
        /// The referencing step.
        step_name: String,
        /// The missing successor.
        next_step: String,
    },

    /// Inline workflow expansion hit a recursive inclusion.
    #[error("workflow {workflow_name} inlines itself (via {step_name})")]
    RecursiveInline {
        /// The workflow being planned.
        workflow_name: String,
        /// The inlining step.
        step_name: String,
    },

    /// No executor is registered for the requested type or artifact.
    #[error("no executor registered for {kind} {key:?}")]
    NoExecutor {
        /// What was looked up ("node type" or "artifact").
        kind: &'static str,
        /// The lookup key.
        key: String,
    },

    /// An operation has no implementation anywhere in the type hierarchy.
    #[error("no implementation found for operation {operation} on type {type_name}")]
    MissingImplementation {
        /// The operation that was looked up.
        operation: String,
        /// The node type carrying the interface.
        type_name: String,
    },

    /// An executor failed a step.
    #[error("execution of step {step_name} failed: {message}")]
    StepFailed {
        /// The failed step.
        step_name: String,
        /// Executor-provided detail.
        message: String,
    },

    /// A scheduled action is missing a mandatory field.
    #[error("invalid scheduled action: {message}")]
    InvalidAction {
        /// Description of the problem.
        message: String,
    },

    /// An error from the task registry.
    #[error(transparent)]
    Tasks(#[from] maestro_tasks::Error),

    /// An error from the deployment data model.
    #[error(transparent)]
    Deployments(#[from] maestro_deployments::Error),

    /// An error from the coordination store.
    #[error("core error: {0}")]
    Core(#[from] maestro_core::Error),
}

impl Error {
    /// Creates a step failure with executor-provided detail.
    #[must_use]
    pub fn step_failed(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step_name: step_name.into(),
            message: message.into(),
        }
    }
}
