//! # maestro-cli
//!
//! Command-line interface for the Maestro orchestrator: the `server`
//! subcommand runs a single-node engine with its REST API, the rest talk
//! to a running server over HTTP.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod commands;

use clap::{Parser, Subcommand};

/// The Maestro command-line interface.
#[derive(Debug, Parser)]
#[command(name = "maestro", about = "TOSCA application orchestrator", version)]
pub struct Cli {
    /// Base URL of the Maestro server for client subcommands.
    #[arg(
        long,
        global = true,
        env = "MAESTRO_API",
        default_value = "http://localhost:8800"
    )]
    pub api_url: String,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Runs the Maestro server.
    Server(commands::server::ServerArgs),
    /// Undeploys an application.
    Undeploy(commands::undeploy::UndeployArgs),
    /// Inspects and manages tasks.
    Tasks(commands::tasks::TasksArgs),
}
