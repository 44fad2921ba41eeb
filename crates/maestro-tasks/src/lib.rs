//! # maestro-tasks
//!
//! Task registry for the Maestro orchestrator.
//!
//! A task is a long-running operation registered against a deployment:
//! deploy, undeploy, scale, a custom workflow, a query or a scheduled
//! action tick. Tasks live in the coordination store, carry string data,
//! track per-step status, and move through a validated state machine.
//!
//! The registry enforces the **living-task invariant**: at most one
//! blocking task (deploy, undeploy, purge, scale, node add/remove) may be
//! alive (`INITIAL` or `RUNNING`) per target at a time.
//!
//! Cancellation is advisory: [`TaskRegistry::cancel_task`] plants a
//! sentinel flag that executors observe at safe points; it never preempts
//! a step.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod paths;
pub mod registry;
pub mod status;

pub use error::{Error, Result};
pub use registry::{TaskRegistry, TaskStep};
pub use status::{check_step_status_change, StepStatus, TaskStatus, TaskType};
