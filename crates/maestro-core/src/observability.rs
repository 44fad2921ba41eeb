//! Observability infrastructure for Maestro.
//!
//! Structured logging with consistent spans across all components. This
//! module provides initialization helpers and span constructors so every
//! crate logs deployment and task context the same way.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `maestro_engine=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for task execution with standard fields.
///
/// # Example
///
/// ```rust
/// use maestro_core::observability::task_span;
///
/// let span = task_span("run_workflow", "dep-1", "01J0000000000000000000TASK");
/// let _guard = span.enter();
/// // ... execute steps
/// ```
#[must_use]
pub fn task_span(operation: &str, deployment_id: &str, task_id: &str) -> Span {
    tracing::info_span!(
        "task",
        op = operation,
        deployment_id = deployment_id,
        task_id = task_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = task_span("run_workflow", "dep-1", "t-1");
        let _guard = span.enter();
        tracing::info!("message in span");
    }
}
