//! # maestro-engine
//!
//! The deployment engine: workflow planning and execution for Maestro.
//!
//! This crate turns registered tasks into running workflows:
//!
//! - **Planner** ([`planner`]): reads a workflow DAG from the store into an
//!   arena of steps with reference-counted joins and detected roots
//! - **Executor** ([`executor`]): a fixed-size worker pool that walks the
//!   DAG with fan-in/fan-out, cooperative cancellation, resume-on-failure
//!   and bounded graceful termination
//! - **Dispatcher** ([`dispatcher`]): watches the task subtree and drives
//!   `INITIAL` tasks through their workflows
//! - **Scheduled actions** ([`scheduling`]): leader-owned recurring actions
//!   that inject synthetic tasks
//! - **Executor registry** ([`registry`]): maps node types and artifact
//!   kinds to delegate/operation executors
//! - **Input resolver** ([`inputs`]): builds the ordered env-input set
//!   handed to operation executors
//! - **Server** ([`server`]): the composition root with graceful shutdown
//!
//! There is no provisioning logic here: executors are trait objects
//! registered by infrastructure adapters or plugins.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod graph;
pub mod inputs;
pub mod planner;
pub mod registry;
pub mod scheduling;
pub mod server;

pub use config::ServerConfig;
pub use context::{DelegateExecutor, ExecutionContext, Operation, OperationExecutor};
pub use error::{Error, Result};
pub use executor::{TaskOutcome, WorkflowExecutor};
pub use graph::{Step, StepIndex, WorkflowGraph};
pub use inputs::EnvInput;
pub use registry::{ExecutorOrigin, ExecutorRegistry};
pub use scheduling::{Action, ActionHandler, ActionScheduler};
pub use server::Server;
