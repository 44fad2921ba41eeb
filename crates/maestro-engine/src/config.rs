//! Server configuration.
//!
//! Configuration comes from three layers composed by the CLI: a JSON/YAML
//! file, `MAESTRO_*` environment overrides and command-line flags. This
//! struct is the merged result, passed by reference to every component;
//! there is no global configuration state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use maestro_core::{Error, Result};

const ENV_SERVER_ID: &str = "MAESTRO_SERVER_ID";
const ENV_WORKERS_NUMBER: &str = "MAESTRO_WORKERS_NUMBER";
const ENV_GRACEFUL_SHUTDOWN_TIMEOUT: &str = "MAESTRO_SERVER_GRACEFUL_SHUTDOWN_TIMEOUT";
const ENV_STEP_TERMINATION_TIMEOUT: &str = "MAESTRO_WF_STEP_GRACEFUL_TERMINATION_TIMEOUT";
const ENV_HTTP_ADDRESS: &str = "MAESTRO_HTTP_ADDRESS";
const ENV_HTTP_PORT: &str = "MAESTRO_HTTP_PORT";
const ENV_PLUGINS_DIRECTORY: &str = "MAESTRO_PLUGINS_DIRECTORY";

/// Merged server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Identifier of this server instance in the cluster.
    pub server_id: String,

    /// Number of workflow workers.
    pub workers_number: usize,

    /// How long a shutdown waits for in-flight work before abandoning it.
    #[serde(with = "humantime_serde")]
    pub server_graceful_shutdown_timeout: Duration,

    /// How long the executor waits for in-flight steps after a concurrent
    /// failure or cancellation before marking them `error`/`canceled`.
    #[serde(with = "humantime_serde")]
    pub wf_step_graceful_termination_timeout: Duration,

    /// Listening address for the HTTP REST API.
    pub http_address: String,

    /// Port number for the HTTP REST API.
    pub http_port: u16,

    /// Directory scanned for executor plugins.
    pub plugins_directory: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: "maestro".to_string(),
            workers_number: 3,
            server_graceful_shutdown_timeout: Duration::from_secs(5 * 60),
            wf_step_graceful_termination_timeout: Duration::from_secs(2 * 60),
            http_address: "0.0.0.0".to_string(),
            http_port: 8800,
            plugins_directory: "plugins".to_string(),
        }
    }
}

impl ServerConfig {
    /// Applies `MAESTRO_*` environment overrides on top of this config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unparsable override values.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from a custom environment source (test-friendly).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unparsable override values.
    pub fn with_env_overrides_from<F>(mut self, get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = get_env(ENV_SERVER_ID) {
            self.server_id = raw;
        }
        if let Some(raw) = get_env(ENV_WORKERS_NUMBER) {
            self.workers_number = raw.parse().map_err(|_| {
                Error::InvalidInput(format!("{ENV_WORKERS_NUMBER} must be an integer, got {raw:?}"))
            })?;
        }
        if let Some(raw) = get_env(ENV_GRACEFUL_SHUTDOWN_TIMEOUT) {
            self.server_graceful_shutdown_timeout = parse_duration(ENV_GRACEFUL_SHUTDOWN_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get_env(ENV_STEP_TERMINATION_TIMEOUT) {
            self.wf_step_graceful_termination_timeout =
                parse_duration(ENV_STEP_TERMINATION_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get_env(ENV_HTTP_ADDRESS) {
            self.http_address = raw;
        }
        if let Some(raw) = get_env(ENV_HTTP_PORT) {
            self.http_port = raw.parse().map_err(|_| {
                Error::InvalidInput(format!("{ENV_HTTP_PORT} must be a port number, got {raw:?}"))
            })?;
        }
        if let Some(raw) = get_env(ENV_PLUGINS_DIRECTORY) {
            self.plugins_directory = raw;
        }
        if self.workers_number == 0 {
            return Err(Error::InvalidInput(
                "workers_number must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).map_err(|e| {
        Error::InvalidInput(format!("{key} must be a duration (e.g. \"5m\"): {e}"))
    })
}
