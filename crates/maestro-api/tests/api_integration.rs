//! REST surface tests over the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use maestro_api::{router, AppState};
use maestro_core::{DeploymentId, KvStore, MemoryKvStore, TaskId};
use maestro_tasks::{StepStatus, TaskRegistry, TaskStatus, TaskType};

fn app() -> (Router, Arc<dyn KvStore>, TaskRegistry) {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let state = AppState::new(Arc::clone(&store));
    let tasks = state.tasks().clone();
    (router(state), store, tasks)
}

fn topology_body() -> Value {
    json!({
        "types": {
            "tosca.nodes.Compute": {}
        },
        "nodes": {
            "compute": {"type": "tosca.nodes.Compute", "instances": 2}
        },
        "workflows": {
            "install": {
                "steps": {
                    "Compute_started": {
                        "node": "compute",
                        "activity": {"set-state": "started"}
                    }
                }
            },
            "restart": {
                "steps": {
                    "Compute_restarted": {
                        "node": "compute",
                        "activity": {"set-state": "started"}
                    }
                },
                "inputs": {
                    "reason": {"required": true}
                }
            }
        }
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request should be handled");
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().expect("location header").to_string());
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, location, body)
}

fn put_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn task_id_from_location(location: &str) -> TaskId {
    location
        .rsplit('/')
        .next()
        .expect("task segment")
        .parse()
        .expect("task id")
}

#[tokio::test]
async fn deployment_submission_creates_topology_and_deploy_task() {
    let (router, _store, tasks) = app();

    let (status, location, _) = send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let location = location.expect("location header");
    assert!(location.starts_with("/deployments/dep-1/tasks/"));

    let task_id = task_id_from_location(&location);
    assert_eq!(
        tasks.get_task_type(&task_id).await.expect("type"),
        TaskType::Deploy
    );

    let (status, _, body) = send(&router, request("GET", "/deployments/dep-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "INITIAL");
}

#[tokio::test]
async fn second_deploy_conflicts_while_first_is_living() {
    let (router, _store, _tasks) = app();

    let (status, location, _) = send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let first_task = task_id_from_location(&location.expect("location"));

    let (status, _, body) = send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    // The error body names the living task.
    let detail = body["errors"][0]["detail"].as_str().expect("detail");
    assert!(detail.contains(&first_task.to_string()));
    assert_eq!(body["errors"][0]["status"], 409);
}

#[tokio::test]
async fn resubmission_after_completion_returns_200() {
    let (router, _store, tasks) = app();

    let (_, location, _) = send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    let task_id = task_id_from_location(&location.expect("location"));
    tasks
        .set_task_status(&task_id, TaskStatus::Running)
        .await
        .expect("run");
    tasks
        .set_task_status(&task_id, TaskStatus::Done)
        .await
        .expect("done");

    let (status, _, _) = send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_deployment_is_404_with_error_body() {
    let (router, _store, _tasks) = app();

    let (status, _, body) = send(&router, request("GET", "/deployments/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["id"], "not_found");
    assert_eq!(body["errors"][0]["status"], 404);
}

#[tokio::test]
async fn undeploy_registers_the_right_task_type() {
    let (router, _store, tasks) = app();
    send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    // Finish the deploy task so undeploy isn't blocked.
    let living = tasks
        .find_living_blocking_task(&DeploymentId::new("dep-1").unwrap())
        .await
        .expect("scan")
        .expect("deploy task");
    tasks.set_task_status(&living.0, TaskStatus::Running).await.unwrap();
    tasks.set_task_status(&living.0, TaskStatus::Done).await.unwrap();

    let (status, location, _) = send(&router, request("DELETE", "/deployments/dep-1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let undeploy_task = task_id_from_location(&location.expect("location"));
    assert_eq!(
        tasks.get_task_type(&undeploy_task).await.expect("type"),
        TaskType::UnDeploy
    );

    // Purge variant.
    tasks.set_task_status(&undeploy_task, TaskStatus::Running).await.unwrap();
    tasks.set_task_status(&undeploy_task, TaskStatus::Done).await.unwrap();
    let (status, location, _) =
        send(&router, request("DELETE", "/deployments/dep-1?purge=true")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let purge_task = task_id_from_location(&location.expect("location"));
    assert_eq!(
        tasks.get_task_type(&purge_task).await.expect("type"),
        TaskType::Purge
    );
}

#[tokio::test]
async fn workflow_submission_validates_and_registers() {
    let (router, _store, tasks) = app();
    send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    let deployment = DeploymentId::new("dep-1").unwrap();
    let living = tasks
        .find_living_blocking_task(&deployment)
        .await
        .unwrap()
        .unwrap();

    // A living blocking task turns workflow submission down with 400.
    let (status, _, body) = send(
        &router,
        post_json("/deployments/dep-1/workflows/install", &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0]["detail"]
        .as_str()
        .expect("detail")
        .contains(&living.0.to_string()));

    tasks.set_task_status(&living.0, TaskStatus::Running).await.unwrap();
    tasks.set_task_status(&living.0, TaskStatus::Done).await.unwrap();

    // Unknown workflow.
    let (status, _, _) = send(
        &router,
        post_json("/deployments/dep-1/workflows/ghost", &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown node in the selection.
    let (status, _, _) = send(
        &router,
        post_json(
            "/deployments/dep-1/workflows/install",
            &json!({"nodesInstances": [{"nodeName": "ghost", "instances": ["0"]}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown instance in the selection.
    let (status, _, _) = send(
        &router,
        post_json(
            "/deployments/dep-1/workflows/install",
            &json!({"nodesInstances": [{"nodeName": "compute", "instances": ["7"]}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing required workflow input.
    let (status, _, body) = send(
        &router,
        post_json("/deployments/dep-1/workflows/restart", &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0]["detail"]
        .as_str()
        .expect("detail")
        .contains("reason"));

    // A valid submission registers a custom-workflow task with the data.
    let (status, location, _) = send(
        &router,
        post_json(
            "/deployments/dep-1/workflows/install?continueOnError",
            &json!({
                "inputs": {"speed": "fast"},
                "nodesInstances": [{"nodeName": "compute", "instances": ["0", "1"]}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = task_id_from_location(&location.expect("location"));
    assert_eq!(
        tasks.get_task_type(&task_id).await.expect("type"),
        TaskType::CustomWorkflow
    );
    assert_eq!(
        tasks.get_task_data(&task_id, "workflowName").await.expect("data"),
        "install"
    );
    assert_eq!(
        tasks.get_task_data(&task_id, "continueOnError").await.expect("data"),
        "true"
    );
    assert_eq!(
        tasks.get_task_data(&task_id, "nodes/compute").await.expect("data"),
        "0,1"
    );
    assert_eq!(
        tasks.get_task_input(&task_id, "speed").await.expect("input"),
        "fast"
    );
}

#[tokio::test]
async fn task_endpoints_cover_lifecycle_and_validation() {
    let (router, store, tasks) = app();
    send(&router, put_json("/deployments/dep-1", &topology_body())).await;
    let deployment = DeploymentId::new("dep-1").unwrap();
    let (task_id, _) = tasks
        .find_living_blocking_task(&deployment)
        .await
        .unwrap()
        .unwrap();

    // Read the task resource.
    let uri = format!("/deployments/dep-1/tasks/{task_id}");
    let (status, _, body) = send(&router, request("GET", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], task_id.to_string());
    assert_eq!(body["targetId"], "dep-1");
    assert_eq!(body["type"], "Deploy");
    assert_eq!(body["status"], "INITIAL");

    // Mismatched deployment is a 400.
    send(&router, put_json("/deployments/dep-2", &topology_body())).await;
    let mismatched = format!("/deployments/dep-2/tasks/{task_id}");
    let (status, _, _) = send(&router, request("GET", &mismatched)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Cancel while INITIAL: accepted, flag planted, status untouched.
    let (status, _, _) = send(&router, request("DELETE", &uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(tasks.is_task_canceled(&task_id).await.expect("flag"));
    assert_eq!(
        tasks.get_task_status(&task_id).await.expect("status"),
        TaskStatus::Initial
    );

    // Steps: register a couple and list them.
    tasks
        .register_steps(&task_id, ["Compute_started"])
        .await
        .expect("steps");
    let steps_uri = format!("{uri}/steps");
    let (status, _, body) = send(&router, request("GET", &steps_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Compute_started");
    assert_eq!(body[0]["status"], "initial");

    // A legal step update succeeds, an illegal one is 403.
    let step_uri = format!("{uri}/steps/Compute_started");
    let (status, _, _) = send(&router, put_json(&step_uri, &json!({"status": "done"}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&router, put_json(&step_uri, &json!({"status": "running"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Resume: only FAILED tasks qualify.
    let resume_uri = format!("{uri}/resume");
    let (status, _, _) = send(&router, request("PUT", &resume_uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    tasks.set_task_status(&task_id, TaskStatus::Running).await.unwrap();
    tasks.set_task_status(&task_id, TaskStatus::Failed).await.unwrap();
    let (status, _, _) = send(&router, request("PUT", &resume_uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        tasks.get_task_status(&task_id).await.expect("status"),
        TaskStatus::Initial
    );
    // Resume clears the stale cancellation flag.
    assert!(!tasks.is_task_canceled(&task_id).await.expect("flag"));

    // Cancel on a DONE task is a 400.
    tasks.set_task_status(&task_id, TaskStatus::Running).await.unwrap();
    tasks.set_task_status(&task_id, TaskStatus::Done).await.unwrap();
    let (status, _, _) = send(&router, request("DELETE", &uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown task is a 404.
    let ghost = TaskId::generate();
    let (status, _, _) = send(
        &router,
        request("GET", &format!("/deployments/dep-1/tasks/{ghost}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Step statuses are readable straight from the store as wire names.
    let raw = store
        .get_string(&format!("_maestro/tasks/{task_id}/steps/Compute_started"))
        .await
        .expect("read");
    assert_eq!(raw.as_deref(), Some("done"));
}
