//! Router assembly and shared application state.

use std::sync::Arc;

use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use maestro_core::KvStore;
use maestro_tasks::TaskRegistry;

use crate::routes;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn KvStore>,
    tasks: TaskRegistry,
}

impl AppState {
    /// Creates application state over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let tasks = TaskRegistry::new(Arc::clone(&store));
        Self { store, tasks }
    }

    /// Returns the store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// Returns the task registry.
    #[must_use]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &"<KvStore>")
            .finish_non_exhaustive()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Builds the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deployments", get(routes::deployments::list_deployments))
        .route(
            "/deployments/{id}",
            put(routes::deployments::create_or_update_deployment)
                .post(routes::deployments::create_or_update_deployment)
                .get(routes::deployments::get_deployment)
                .delete(routes::deployments::undeploy),
        )
        .route(
            "/deployments/{id}/workflows",
            get(routes::workflows::list_workflows),
        )
        .route(
            "/deployments/{id}/workflows/{workflow_name}",
            get(routes::workflows::get_workflow).post(routes::workflows::submit_workflow),
        )
        .route(
            "/deployments/{id}/tasks/{task_id}",
            get(routes::tasks::get_task).delete(routes::tasks::cancel_task),
        )
        .route(
            "/deployments/{id}/tasks/{task_id}/resume",
            put(routes::tasks::resume_task),
        )
        .route(
            "/deployments/{id}/tasks/{task_id}/steps",
            get(routes::tasks::get_task_steps),
        )
        .route(
            "/deployments/{id}/tasks/{task_id}/steps/{step_id}",
            put(routes::tasks::update_task_step),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
