//! Maestro CLI - command-line interface for the orchestrator.
//!
//! The main entry point for the `maestro` binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maestro_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Server(args) => maestro_cli::commands::server::execute(args).await,
            Commands::Undeploy(args) => {
                maestro_cli::commands::undeploy::execute(args, &cli.api_url).await
            }
            Commands::Tasks(args) => maestro_cli::commands::tasks::execute(args, &cli.api_url).await,
        }
    })
}
