//! Request handlers, grouped by resource.

pub mod deployments;
pub mod tasks;
pub mod workflows;

use maestro_core::{DeploymentId, TaskId};

use crate::error::{ApiError, ApiResult};

/// Parses a deployment ID path segment.
pub(crate) fn parse_deployment_id(raw: &str) -> ApiResult<DeploymentId> {
    DeploymentId::new(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Parses a task ID path segment.
pub(crate) fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("task not found: {raw}")))
}

/// The `Location` header value for a task resource.
pub(crate) fn task_location(deployment_id: &DeploymentId, task_id: &TaskId) -> String {
    format!("/deployments/{deployment_id}/tasks/{task_id}")
}
