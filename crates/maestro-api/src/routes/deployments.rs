//! Deployment resource handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use maestro_deployments::topology::TopologyDocument;
use maestro_deployments::{deployment, DeploymentStatus};
use maestro_tasks::TaskType;

use crate::error::{ApiError, ApiResult};
use crate::routes::{parse_deployment_id, task_location};
use crate::server::AppState;

/// One deployment in the listing.
#[derive(Debug, Serialize)]
pub struct DeploymentSummary {
    /// Deployment ID.
    pub id: String,
    /// Current status.
    pub status: DeploymentStatus,
}

/// `GET /deployments`
pub async fn list_deployments(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<DeploymentSummary>>> {
    let store = state.store();
    let mut summaries = Vec::new();
    for id in deployment::list_deployments(store.as_ref()).await? {
        let status = deployment::get_deployment_status(store.as_ref(), &id).await?;
        summaries.push(DeploymentSummary {
            id: id.to_string(),
            status,
        });
    }
    Ok(Json(summaries))
}

/// `GET /deployments/{id}`
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentSummary>> {
    let deployment_id = parse_deployment_id(&id)?;
    let status =
        deployment::get_deployment_status(state.store().as_ref(), &deployment_id).await?;
    Ok(Json(DeploymentSummary {
        id: deployment_id.to_string(),
        status,
    }))
}

/// `PUT|POST /deployments/{id}`
///
/// Stores the submitted topology and registers a deploy task. Returns 201
/// on first submission, 200 on update of an existing deployment, and 409
/// when a living blocking task exists.
pub async fn create_or_update_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(document): Json<TopologyDocument>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let store = state.store();

    let existed = deployment::deployment_exists(store.as_ref(), &deployment_id).await?;
    if let Some((living_task_id, living_type)) = state
        .tasks()
        .find_living_blocking_task(&deployment_id)
        .await?
    {
        return Err(ApiError::conflict(format!(
            "task {living_task_id} of type {living_type} is still living on deployment {deployment_id}"
        )));
    }

    maestro_deployments::topology::store_topology(store, &deployment_id, &document).await?;
    let task_id = state
        .tasks()
        .register_task(&deployment_id, TaskType::Deploy)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&task_location(&deployment_id, &task_id))
            .map_err(|e| ApiError::internal(e.to_string()))?,
    );
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, headers))
}

/// `DELETE /deployments/{id}?purge=[true|false]`
///
/// Registers an undeploy (or purge) task; 202 with the task location.
pub async fn undeploy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let store = state.store();
    if !deployment::deployment_exists(store.as_ref(), &deployment_id).await? {
        return Err(ApiError::not_found(format!(
            "deployment not found: {deployment_id}"
        )));
    }

    let purge = params.get("purge").map(String::as_str) == Some("true");
    let task_type = if purge { TaskType::Purge } else { TaskType::UnDeploy };
    let task_id = state.tasks().register_task(&deployment_id, task_type).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&task_location(&deployment_id, &task_id))
            .map_err(|e| ApiError::internal(e.to_string()))?,
    );
    Ok((StatusCode::ACCEPTED, headers))
}
