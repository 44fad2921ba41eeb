//! Workflow resource handlers.

use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_deployments::{deployment, nodes, workflows, DeploymentStatus};
use maestro_tasks::TaskType;

use crate::error::{ApiError, ApiResult};
use crate::routes::{parse_deployment_id, task_location};
use crate::server::AppState;

/// Instance selection for one node in a workflow request.
#[derive(Debug, Default, Deserialize)]
pub struct NodeInstances {
    /// The node the selection applies to.
    #[serde(rename = "nodeName")]
    pub node_name: String,
    /// The selected instance IDs.
    #[serde(default)]
    pub instances: Vec<String>,
}

/// Body of a workflow submission.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowRequest {
    /// Workflow input values.
    pub inputs: BTreeMap<String, Value>,
    /// Per-node instance selections.
    #[serde(rename = "nodesInstances")]
    pub nodes_instances: Vec<NodeInstances>,
}

/// A workflow listing entry.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    /// Workflow name.
    pub name: String,
}

/// `GET /deployments/{id}/workflows`
pub async fn list_workflows(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<WorkflowSummary>>> {
    let deployment_id = parse_deployment_id(&id)?;
    let store = state.store();
    ensure_deployment_exists(&state, &deployment_id).await?;

    let names = workflows::get_workflows(store.as_ref(), &deployment_id).await?;
    Ok(Json(
        names
            .into_iter()
            .map(|name| WorkflowSummary { name })
            .collect(),
    ))
}

/// `GET /deployments/{id}/workflows/{workflow_name}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path((id, workflow_name)): Path<(String, String)>,
) -> ApiResult<Json<workflows::WorkflowDefinition>> {
    let deployment_id = parse_deployment_id(&id)?;
    ensure_deployment_exists(&state, &deployment_id).await?;

    let definition = workflows::get_workflow(state.store().as_ref(), &deployment_id, &workflow_name)
        .await
        .map_err(|err| {
            if err.is_not_found() {
                ApiError::not_found(format!("workflow not found: {workflow_name}"))
            } else {
                err.into()
            }
        })?;
    Ok(Json(definition))
}

/// `POST /deployments/{id}/workflows/{name}?continueOnError`
///
/// Validates the request against the workflow definition and registers a
/// custom-workflow task; 201 with the task location.
pub async fn submit_workflow(
    State(state): State<AppState>,
    Path((id, workflow_name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<WorkflowRequest>>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = parse_deployment_id(&id)?;
    let store = state.store();
    ensure_deployment_exists(&state, &deployment_id).await?;

    let status = deployment::get_deployment_status(store.as_ref(), &deployment_id).await?;
    if status == DeploymentStatus::UpdateInProgress {
        return Err(ApiError::conflict(
            "workflow can't be executed as an update is in progress for this deployment",
        ));
    }

    let known = workflows::get_workflows(store.as_ref(), &deployment_id).await?;
    if !known.iter().any(|name| name == &workflow_name) {
        return Err(ApiError::not_found(format!(
            "workflow not found: {workflow_name}"
        )));
    }

    // A living blocking task turns the submission down with a 400 naming
    // the living task, so clients can watch it.
    if let Some((living_task_id, living_type)) = state
        .tasks()
        .find_living_blocking_task(&deployment_id)
        .await?
    {
        return Err(ApiError::bad_request(format!(
            "task {living_task_id} of type {living_type} is still living on deployment {deployment_id}"
        )));
    }

    let mut data: BTreeMap<String, String> = BTreeMap::new();
    data.insert("workflowName".to_string(), workflow_name.clone());
    data.insert(
        "continueOnError".to_string(),
        params.contains_key("continueOnError").to_string(),
    );

    let request = body.map(|Json(request)| request).unwrap_or_default();

    for node_instances in &request.nodes_instances {
        let node_name = &node_instances.node_name;
        if !nodes::node_exists(store.as_ref(), &deployment_id, node_name).await? {
            return Err(ApiError::bad_request(format!(
                "node {node_name:?} must exist"
            )));
        }
        let known_instances =
            nodes::get_node_instances_ids(store.as_ref(), &deployment_id, node_name).await?;
        for instance in &node_instances.instances {
            if !known_instances.contains(instance) {
                return Err(ApiError::bad_request(format!(
                    "instance {instance:?} must exist"
                )));
            }
        }
        data.insert(
            format!("nodes/{node_name}"),
            node_instances.instances.join(","),
        );
    }

    for (input_name, input_value) in &request.inputs {
        let rendered = match input_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        data.insert(format!("inputs/{input_name}"), rendered);
    }

    // Every required workflow input must have a value.
    let definition =
        workflows::get_workflow(store.as_ref(), &deployment_id, &workflow_name).await?;
    for (input_name, input) in &definition.inputs {
        if input.required && input.default.is_none() && !request.inputs.contains_key(input_name) {
            return Err(ApiError::bad_request(format!(
                "missing value for required workflow input parameter {input_name}"
            )));
        }
    }

    let task_id = state
        .tasks()
        .register_task_with_data(&deployment_id, TaskType::CustomWorkflow, data)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&task_location(&deployment_id, &task_id))
            .map_err(|e| ApiError::internal(e.to_string()))?,
    );
    Ok((StatusCode::CREATED, headers))
}

async fn ensure_deployment_exists(
    state: &AppState,
    deployment_id: &maestro_core::DeploymentId,
) -> ApiResult<()> {
    if deployment::deployment_exists(state.store().as_ref(), deployment_id).await? {
        Ok(())
    } else {
        Err(ApiError::not_found(format!(
            "deployment not found: {deployment_id}"
        )))
    }
}
