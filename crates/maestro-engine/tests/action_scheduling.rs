//! Scheduled action service tests against a full engine instance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use maestro_core::{DeploymentId, KvStore, MemoryKvStore};
use maestro_engine::scheduling::{register_action, unregister_action, Action};
use maestro_engine::{ActionHandler, ExecutionContext, Server, ServerConfig};
use maestro_tasks::{TaskStatus, TaskType};

struct CountingHandler {
    executions: Arc<AtomicUsize>,
    last_job: Arc<std::sync::Mutex<Option<String>>>,
}

#[async_trait]
impl ActionHandler for CountingHandler {
    async fn exec_action(
        &self,
        _ctx: &ExecutionContext,
        action_data: &BTreeMap<String, String>,
    ) -> maestro_engine::Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        *self.last_job.lock().expect("job lock") = action_data.get("data/jobID").cloned();
        Ok(())
    }
}

#[tokio::test]
async fn registered_action_ticks_until_unregistered() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let deployment = DeploymentId::new("dep-1").expect("deployment id");
    let server = Arc::new(Server::new(ServerConfig::default(), Arc::clone(&store)));

    let executions = Arc::new(AtomicUsize::new(0));
    let last_job = Arc::new(std::sync::Mutex::new(None));
    server.action_scheduler().register_handler(
        "k8s-job-monitoring",
        Arc::new(CountingHandler {
            executions: Arc::clone(&executions),
            last_job: Arc::clone(&last_job),
        }),
    );

    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let mut data = BTreeMap::new();
    data.insert("jobID".to_string(), "j1".to_string());
    let action_id = register_action(
        store.as_ref(),
        &deployment,
        Duration::from_millis(200),
        &Action {
            action_type: "k8s-job-monitoring".to_string(),
            data,
        },
    )
    .await
    .expect("register action");

    // Wait for at least one tick to be injected and executed.
    let mut waited = Duration::ZERO;
    while executions.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    assert!(
        executions.load(Ordering::SeqCst) >= 1,
        "an action tick should have executed"
    );
    assert_eq!(last_job.lock().expect("job lock").as_deref(), Some("j1"));

    // The injected tasks carry the action's data and finish DONE.
    let tasks = server.tasks();
    let ids = tasks
        .get_tasks_ids_for_target(&deployment)
        .await
        .expect("task ids");
    assert!(!ids.is_empty());
    for id in &ids {
        assert_eq!(tasks.get_task_type(id).await.expect("type"), TaskType::Action);
    }

    // Unregister: the subtree disappears and ticking stops.
    unregister_action(store.as_ref(), &action_id)
        .await
        .expect("unregister");
    let mut waited = Duration::ZERO;
    while waited < Duration::from_secs(5) {
        let remaining = store
            .child_names(&format!(
                "_maestro/scheduling/actions/{action_id}/"
            ))
            .await
            .expect("scan");
        if remaining.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }

    let count_after_unregister = executions.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        executions.load(Ordering::SeqCst),
        count_after_unregister,
        "no further ticks after unregistration"
    );

    // At least one injected task ran to completion.
    let mut any_done = false;
    for id in &tasks.get_tasks_ids_for_target(&deployment).await.expect("ids") {
        if tasks.get_task_status(id).await.expect("status") == TaskStatus::Done {
            any_done = true;
        }
    }
    assert!(any_done, "an action task should have finished DONE");

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("server stops")
        .expect("no panic");
}
