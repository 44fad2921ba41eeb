//! Task and step status enums with validated transitions.
//!
//! Statuses are stored as ASCII wire names for observability; every
//! transition goes through a single table and unknown stored values are
//! rejected at read time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The kind of operation a task performs against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Initial deployment.
    Deploy,
    /// Teardown.
    UnDeploy,
    /// Add instances to a node.
    ScaleOut,
    /// Remove instances from a node.
    ScaleIn,
    /// Teardown plus removal of the deployment subtree.
    Purge,
    /// A single custom command.
    CustomCommand,
    /// A user-submitted workflow.
    CustomWorkflow,
    /// A read-only query.
    Query,
    /// A scheduled action tick.
    Action,
    /// Add new nodes to the topology.
    AddNodes,
    /// Remove nodes from the topology.
    RemoveNodes,
}

impl TaskType {
    /// Returns the wire name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "Deploy",
            Self::UnDeploy => "UnDeploy",
            Self::ScaleOut => "ScaleOut",
            Self::ScaleIn => "ScaleIn",
            Self::Purge => "Purge",
            Self::CustomCommand => "CustomCommand",
            Self::CustomWorkflow => "CustomWorkflow",
            Self::Query => "Query",
            Self::Action => "Action",
            Self::AddNodes => "AddNodes",
            Self::RemoveNodes => "RemoveNodes",
        }
    }

    /// Returns true if a living task of this type blocks registration of
    /// other blocking tasks on the same target.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::Deploy
                | Self::UnDeploy
                | Self::ScaleOut
                | Self::ScaleIn
                | Self::Purge
                | Self::AddNodes
                | Self::RemoveNodes
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Deploy" => Ok(Self::Deploy),
            "UnDeploy" => Ok(Self::UnDeploy),
            "ScaleOut" => Ok(Self::ScaleOut),
            "ScaleIn" => Ok(Self::ScaleIn),
            "Purge" => Ok(Self::Purge),
            "CustomCommand" => Ok(Self::CustomCommand),
            "CustomWorkflow" => Ok(Self::CustomWorkflow),
            "Query" => Ok(Self::Query),
            "Action" => Ok(Self::Action),
            "AddNodes" => Ok(Self::AddNodes),
            "RemoveNodes" => Ok(Self::RemoveNodes),
            other => Err(Error::InvalidEnumValue {
                kind: "task type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Registered, not yet picked up.
    Initial,
    /// Being executed.
    Running,
    /// Completed successfully.
    Done,
    /// Completed with an error.
    Failed,
    /// Canceled before completion.
    Canceled,
}

impl TaskStatus {
    /// Returns the wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Returns true if the task still counts as living.
    #[must_use]
    pub const fn is_living(&self) -> bool {
        matches!(self, Self::Initial | Self::Running)
    }

    /// Returns true if the transition from self to `target` is valid.
    ///
    /// `FAILED -> INITIAL` is the resume re-arm: the task becomes
    /// schedulable again and moves to `RUNNING` when picked up.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Initial => matches!(target, Self::Running | Self::Canceled),
            Self::Running => matches!(target, Self::Done | Self::Failed | Self::Canceled),
            Self::Failed => matches!(target, Self::Running | Self::Initial),
            Self::Done | Self::Canceled => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "INITIAL" => Ok(Self::Initial),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(Error::InvalidEnumValue {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a single workflow step within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started.
    Initial,
    /// In flight.
    Running,
    /// Completed successfully.
    Done,
    /// Completed with an error.
    Error,
    /// Canceled before completion.
    Canceled,
}

impl StepStatus {
    /// Returns the wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "initial" => Ok(Self::Initial),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            other => Err(Error::InvalidEnumValue {
                kind: "step status",
                value: other.to_string(),
            }),
        }
    }
}

/// Returns true if a step may move from `from` to `to`.
///
/// The permitted transitions:
///
/// | from \ to | initial | running | done | error | canceled |
/// |-----------|---------|---------|------|-------|----------|
/// | initial   | –       | ✓       | ✓    | ✓     | ✓        |
/// | running   |         | –       | ✓    | ✓     | ✓        |
/// | done      |         |         | –    |       |          |
/// | error     |         | ✓       |      | –     |          |
/// | canceled  |         | ✓       |      |       | –        |
#[must_use]
pub fn check_step_status_change(from: StepStatus, to: StepStatus) -> bool {
    match from {
        StepStatus::Initial => !matches!(to, StepStatus::Initial),
        StepStatus::Running => matches!(to, StepStatus::Done | StepStatus::Error | StepStatus::Canceled),
        StepStatus::Done => false,
        StepStatus::Error | StepStatus::Canceled => matches!(to, StepStatus::Running),
    }
}
