//! Error types for the task registry.

use maestro_core::TaskId;

/// The result type used throughout maestro-tasks.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in task registry operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A blocking task is already alive on the target.
    #[error("task {living_task_id} of type {living_task_type} is still living on target {target_id}")]
    AnotherLivingTaskAlreadyExists {
        /// The living task blocking registration.
        living_task_id: TaskId,
        /// The living task's type (wire name).
        living_task_type: String,
        /// The contended target.
        target_id: String,
    },

    /// A task does not exist.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The missing task.
        task_id: TaskId,
    },

    /// A task exists but a piece of its data is absent.
    ///
    /// Distinguished from [`Error::TaskNotFound`] so input resolution can
    /// fall back to type-level defaults.
    #[error("data {key:?} not found for task {task_id}")]
    TaskDataNotFound {
        /// The task whose data was read.
        task_id: TaskId,
        /// The missing data key.
        key: String,
    },

    /// A step does not exist on the task.
    #[error("step {step_name:?} not found for task {task_id}")]
    StepNotFound {
        /// The task whose step was read.
        task_id: TaskId,
        /// The missing step name.
        step_name: String,
    },

    /// An invalid task status transition was attempted.
    #[error("invalid task status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status (wire name).
        from: String,
        /// Attempted target status (wire name).
        to: String,
    },

    /// An invalid step status transition was attempted.
    #[error("forbidden step status transition: {from} -> {to}")]
    InvalidStepTransition {
        /// Current step status (wire name).
        from: String,
        /// Attempted target step status (wire name).
        to: String,
    },

    /// A stored enum value is not a member of its enum.
    #[error("invalid {kind} value: {value}")]
    InvalidEnumValue {
        /// The enum kind.
        kind: &'static str,
        /// The offending stored value.
        value: String,
    },

    /// An error from the deployment data model.
    #[error(transparent)]
    Deployments(#[from] maestro_deployments::Error),

    /// An error from the coordination store.
    #[error("core error: {0}")]
    Core(#[from] maestro_core::Error),
}

impl Error {
    /// Returns true if this is the living-task conflict.
    #[must_use]
    pub const fn is_another_living_task(&self) -> bool {
        matches!(self, Self::AnotherLivingTaskAlreadyExists { .. })
    }

    /// Returns true if this is a missing-task-data error (the task itself
    /// exists).
    #[must_use]
    pub const fn is_task_data_not_found(&self) -> bool {
        matches!(self, Self::TaskDataNotFound { .. })
    }
}
