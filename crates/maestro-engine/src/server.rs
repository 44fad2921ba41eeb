//! The server composition root.
//!
//! There is no global state: the server owns the store handle, the task
//! registry, the executor registry and the background services, and hands
//! references down. Shutdown is a broadcast: intake stops, workers and the
//! scheduler get the signal, and after the configured deadline whatever is
//! still running is abandoned (tasks remain `RUNNING` in the store for the
//! next leader to reconcile).

use std::sync::Arc;

use tokio::sync::watch;

use maestro_core::KvStore;
use maestro_tasks::TaskRegistry;

use crate::config::ServerConfig;
use crate::dispatcher::TaskDispatcher;
use crate::executor::WorkflowExecutor;
use crate::registry::ExecutorRegistry;
use crate::scheduling::ActionScheduler;

/// A composed Maestro engine instance.
pub struct Server {
    config: ServerConfig,
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
    registry: Arc<ExecutorRegistry>,
    scheduler: Arc<ActionScheduler>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Composes a server over the given store.
    #[must_use]
    pub fn new(config: ServerConfig, store: Arc<dyn KvStore>) -> Self {
        let tasks = TaskRegistry::new(Arc::clone(&store));
        let registry = Arc::new(ExecutorRegistry::new());
        let scheduler = Arc::new(ActionScheduler::new(Arc::clone(&store), tasks.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            tasks,
            registry,
            scheduler,
            shutdown_tx,
        }
    }

    /// Returns the store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// Returns the task registry.
    #[must_use]
    pub fn tasks(&self) -> TaskRegistry {
        self.tasks.clone()
    }

    /// Returns the executor registry, for adapter and plugin registration.
    #[must_use]
    pub fn executor_registry(&self) -> Arc<ExecutorRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns the action scheduler, for handler registration and action
    /// management.
    #[must_use]
    pub fn action_scheduler(&self) -> Arc<ActionScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns a receiver of the shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Requests shutdown: intake stops and background services drain.
    pub fn shutdown(&self) {
        tracing::info!(server_id = %self.config.server_id, "shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Runs the dispatcher and action scheduler until shutdown, honouring
    /// the graceful shutdown deadline.
    pub async fn run(&self) {
        tracing::info!(
            server_id = %self.config.server_id,
            workers = self.config.workers_number,
            "maestro engine starting"
        );

        let executor = WorkflowExecutor::new(
            Arc::clone(&self.store),
            self.tasks.clone(),
            Arc::clone(&self.registry),
            self.config.workers_number,
            self.config.wf_step_graceful_termination_timeout,
        );
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&self.store),
            self.tasks.clone(),
            executor,
            Arc::clone(&self.scheduler),
            self.config.server_graceful_shutdown_timeout,
        );

        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_shutdown = self.shutdown_signal();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        dispatcher.run(self.shutdown_signal()).await;

        if let Err(err) = scheduler_handle.await {
            tracing::warn!(error = %err, "action scheduler terminated abnormally");
        }
        tracing::info!(server_id = %self.config.server_id, "maestro engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MemoryKvStore;

    #[tokio::test]
    async fn server_runs_until_shutdown() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let server = Arc::new(Server::new(ServerConfig::default(), store));

        let runner = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        server.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(5), runner)
            .await
            .expect("server should stop before the timeout")
            .expect("server task should not panic");
    }
}
