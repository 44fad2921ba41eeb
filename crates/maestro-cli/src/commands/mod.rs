//! Subcommand implementations.

pub mod server;
pub mod tasks;
pub mod undeploy;
