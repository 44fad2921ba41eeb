//! The `server` subcommand.
//!
//! Configuration is composed from three layers, lowest precedence first:
//! a JSON/YAML config file (`--config`, falling back to
//! `/etc/maestro/config.maestro.{yaml,yml,json}`), `MAESTRO_*` environment
//! overrides and command-line flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use maestro_api::AppState;
use maestro_core::{KvStore, MemoryKvStore};
use maestro_engine::{Server, ServerConfig};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "/etc/maestro/config.maestro.yaml",
    "/etc/maestro/config.maestro.yml",
    "/etc/maestro/config.maestro.json",
];

/// Arguments of the `server` subcommand.
#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Path to a JSON or YAML configuration file.
    #[arg(long, env = "MAESTRO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of workflow workers.
    #[arg(long)]
    pub workers_number: Option<usize>,

    /// Listening address for the HTTP REST API.
    #[arg(long)]
    pub http_address: Option<String>,

    /// Port number for the HTTP REST API.
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Timeout to wait for a graceful shutdown (e.g. "5m").
    #[arg(long)]
    pub graceful_shutdown_timeout: Option<String>,

    /// Timeout to wait for a graceful termination of workflow steps on
    /// concurrent failure (e.g. "2m").
    #[arg(long)]
    pub wf_step_graceful_termination_timeout: Option<String>,

    /// Directory scanned for executor plugins.
    #[arg(long)]
    pub plugins_directory: Option<String>,
}

impl ServerArgs {
    /// Resolves the final configuration: file, then environment, then
    /// flags.
    ///
    /// # Errors
    ///
    /// Returns an error for an unreadable/unparsable config file or
    /// invalid values.
    pub fn resolve_config(&self) -> Result<ServerConfig> {
        let mut config = match self.config_file() {
            Some(path) => load_config_file(&path)?,
            None => ServerConfig::default(),
        };
        config = config
            .with_env_overrides()
            .context("invalid MAESTRO_* environment override")?;

        if let Some(workers) = self.workers_number {
            config.workers_number = workers;
        }
        if let Some(address) = &self.http_address {
            config.http_address = address.clone();
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(raw) = &self.graceful_shutdown_timeout {
            config.server_graceful_shutdown_timeout = parse_duration_flag(raw)?;
        }
        if let Some(raw) = &self.wf_step_graceful_termination_timeout {
            config.wf_step_graceful_termination_timeout = parse_duration_flag(raw)?;
        }
        if let Some(dir) = &self.plugins_directory {
            config.plugins_directory = dir.clone();
        }
        Ok(config)
    }

    fn config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }
}

fn parse_duration_flag(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).with_context(|| format!("invalid duration {raw:?}"))
}

fn load_config_file(path: &Path) -> Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON config {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML config {}", path.display()))?
    };
    Ok(config)
}

/// Runs the server until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the HTTP
/// listener cannot be bound.
pub async fn execute(args: ServerArgs) -> Result<()> {
    let config = args.resolve_config()?;

    // Single-node mode runs over the in-memory store; a clustered
    // deployment plugs a distributed KvStore implementation in here.
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let server = Arc::new(Server::new(config.clone(), Arc::clone(&store)));

    let app = maestro_api::router(AppState::new(Arc::clone(&store)));
    let bind_address = format!("{}:{}", config.http_address, config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "REST API listening");

    let engine = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let shutdown_server = Arc::clone(&server);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_termination().await;
            shutdown_server.shutdown();
        })
        .await
        .context("HTTP server failed")?;

    engine.await.context("engine task failed")?;
    Ok(())
}

async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installation");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServerArgs {
        ServerArgs {
            config: None,
            workers_number: None,
            http_address: None,
            http_port: None,
            graceful_shutdown_timeout: None,
            wf_step_graceful_termination_timeout: None,
            plugins_directory: None,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let mut a = args();
        a.workers_number = Some(7);
        a.graceful_shutdown_timeout = Some("90s".to_string());

        let config = a.resolve_config().unwrap();
        assert_eq!(config.workers_number, 7);
        assert_eq!(
            config.server_graceful_shutdown_timeout,
            Duration::from_secs(90)
        );
    }

    #[test]
    fn invalid_duration_flag_is_rejected() {
        let mut a = args();
        a.graceful_shutdown_timeout = Some("soon".to_string());
        assert!(a.resolve_config().is_err());
    }
}
