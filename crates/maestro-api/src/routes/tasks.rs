//! Task resource handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use maestro_core::{DeploymentId, TaskId};
use maestro_tasks::{StepStatus, TaskStatus, TaskStep};

use crate::error::{ApiError, ApiResult};
use crate::routes::{parse_deployment_id, parse_task_id};
use crate::server::AppState;

/// A task as returned by the API.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    /// Task ID.
    pub id: String,
    /// The deployment the task targets.
    #[serde(rename = "targetId")]
    pub target_id: String,
    /// Task type (wire name).
    #[serde(rename = "type")]
    pub task_type: String,
    /// Task status (wire name).
    pub status: String,
    /// Result set, when the task produced one.
    #[serde(rename = "resultSet", skip_serializing_if = "Option::is_none")]
    pub result_set: Option<String>,
}

/// Body of a step status update.
#[derive(Debug, Deserialize)]
pub struct StepUpdateRequest {
    /// Target step status.
    pub status: StepStatus,
}

/// Verifies the task exists and targets the deployment in the path.
async fn task_pre_checks(
    state: &AppState,
    deployment_id: &DeploymentId,
    task_id: &TaskId,
) -> ApiResult<()> {
    if !state.tasks().task_exists(task_id).await? {
        return Err(ApiError::not_found(format!("task not found: {task_id}")));
    }
    let target = state.tasks().get_task_target(task_id).await?;
    if &target != deployment_id {
        return Err(ApiError::bad_request(format!(
            "task {task_id} doesn't correspond to the deployment {deployment_id}"
        )));
    }
    Ok(())
}

/// `GET /deployments/{id}/tasks/{task_id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path((id, raw_task_id)): Path<(String, String)>,
) -> ApiResult<Json<TaskResponse>> {
    let deployment_id = parse_deployment_id(&id)?;
    let task_id = parse_task_id(&raw_task_id)?;
    task_pre_checks(&state, &deployment_id, &task_id).await?;

    let status = state.tasks().get_task_status(&task_id).await?;
    let task_type = state.tasks().get_task_type(&task_id).await?;
    let result_set = state.tasks().get_task_result_set(&task_id).await?;

    Ok(Json(TaskResponse {
        id: task_id.to_string(),
        target_id: deployment_id.to_string(),
        task_type: task_type.to_string(),
        status: status.to_string(),
        result_set,
    }))
}

/// `DELETE /deployments/{id}/tasks/{task_id}`
///
/// Plants the advisory cancellation flag; 202. Only `RUNNING` and
/// `INITIAL` tasks can be canceled.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path((id, raw_task_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let task_id = parse_task_id(&raw_task_id)?;
    task_pre_checks(&state, &deployment_id, &task_id).await?;

    let status = state.tasks().get_task_status(&task_id).await?;
    if !matches!(status, TaskStatus::Running | TaskStatus::Initial) {
        return Err(ApiError::bad_request(format!(
            "cannot cancel a task with status {status}"
        )));
    }

    state.tasks().cancel_task(&task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `PUT /deployments/{id}/tasks/{task_id}/resume`
///
/// Re-arms a `FAILED` task; 202.
pub async fn resume_task(
    State(state): State<AppState>,
    Path((id, raw_task_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let task_id = parse_task_id(&raw_task_id)?;
    task_pre_checks(&state, &deployment_id, &task_id).await?;

    let status = state.tasks().get_task_status(&task_id).await?;
    if status != TaskStatus::Failed {
        return Err(ApiError::bad_request(format!(
            "cannot resume a task with status {status}, only tasks in {} status can be resumed",
            TaskStatus::Failed
        )));
    }

    state.tasks().resume_task(&task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /deployments/{id}/tasks/{task_id}/steps`
pub async fn get_task_steps(
    State(state): State<AppState>,
    Path((id, raw_task_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<TaskStep>>> {
    let deployment_id = parse_deployment_id(&id)?;
    let task_id = parse_task_id(&raw_task_id)?;
    task_pre_checks(&state, &deployment_id, &task_id).await?;

    Ok(Json(state.tasks().get_task_related_steps(&task_id).await?))
}

/// `PUT /deployments/{id}/tasks/{task_id}/steps/{step_id}`
///
/// Updates a step's status; 403 on a forbidden transition.
pub async fn update_task_step(
    State(state): State<AppState>,
    Path((id, raw_task_id, step_id)): Path<(String, String, String)>,
    Json(request): Json<StepUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let task_id = parse_task_id(&raw_task_id)?;
    task_pre_checks(&state, &deployment_id, &task_id).await?;

    state
        .tasks()
        .update_task_step_status(&task_id, &step_id, request.status)
        .await?;
    Ok(StatusCode::OK)
}
