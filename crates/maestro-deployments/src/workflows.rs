//! Workflow definition reads.
//!
//! Workflows are named DAGs of steps persisted under
//! `workflows/<name>/steps/<step>/`:
//!
//! ```text
//! workflows/<name>/steps/<step>/node
//! workflows/<name>/steps/<step>/activity/<kind>
//! workflows/<name>/steps/<step>/next/<other>
//! workflows/<name>/steps/<step>/on-failure/<other>
//! workflows/<name>/inputs/<input>/{required, default}
//! ```
//!
//! This module materialises raw definitions; planning (arena construction,
//! root detection, cycle checks) lives in the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use maestro_core::{DeploymentId, KvStore};

use crate::error::{Error, Result};
use crate::paths;

/// One activity carried by a workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Activity {
    /// Delegate the node's whole lifecycle to an infrastructure executor.
    Delegate(String),
    /// Set the lifecycle state of the step's target instances.
    SetState(String),
    /// Call a single interface operation.
    CallOperation(String),
    /// Expand another workflow in place of this step.
    Inline(String),
}

impl Activity {
    /// Returns the wire name of the activity kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Delegate(_) => "delegate",
            Self::SetState(_) => "set-state",
            Self::CallOperation(_) => "call-operation",
            Self::Inline(_) => "inline",
        }
    }

    /// Returns the activity's value (delegate kind, state name, operation
    /// name or inlined workflow name).
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Delegate(v) | Self::SetState(v) | Self::CallOperation(v) | Self::Inline(v) => v,
        }
    }
}

/// A raw workflow step definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// The node the step targets, when any.
    pub node: Option<String>,
    /// The step's activities (at least one for a valid step).
    pub activities: Vec<Activity>,
    /// Names of steps to run after this one succeeds.
    pub next: Vec<String>,
    /// Names of steps to run when this one fails.
    pub on_failure: Vec<String>,
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Whether a value must be supplied at submission time. Inputs are
    /// required by default.
    pub required: bool,
    /// Declared default, when any.
    pub default: Option<String>,
}

/// A materialised workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name.
    pub name: String,
    /// Steps keyed by step name.
    pub steps: BTreeMap<String, StepDefinition>,
    /// Declared inputs keyed by input name.
    pub inputs: BTreeMap<String, WorkflowInput>,
}

/// Lists the workflow names of a deployment.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_workflows(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
) -> Result<Vec<String>> {
    Ok(store
        .child_names(&paths::workflows_prefix(deployment_id))
        .await?)
}

/// Reads a single step definition.
///
/// # Errors
///
/// Returns [`Error::InvalidStep`] when the step has no activity or an
/// unknown activity kind.
pub async fn get_workflow_step(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    workflow_name: &str,
    step_name: &str,
) -> Result<StepDefinition> {
    let step_prefix = format!(
        "{}steps/{step_name}/",
        paths::workflow_prefix(deployment_id, workflow_name)
    );

    let node = store
        .get_string(&format!("{step_prefix}node"))
        .await?
        .filter(|n| !n.is_empty());

    let mut activities = Vec::new();
    let activity_prefix = format!("{step_prefix}activity/");
    for kind in store.child_names(&activity_prefix).await? {
        let value = store
            .get_string(&format!("{activity_prefix}{kind}"))
            .await?
            .unwrap_or_default();
        let activity = match kind.as_str() {
            "delegate" => Activity::Delegate(value),
            "set-state" => Activity::SetState(value),
            "operation" | "call-operation" => Activity::CallOperation(value),
            "inline" => Activity::Inline(value),
            other => {
                return Err(Error::InvalidStep {
                    step_name: step_name.to_string(),
                    message: format!("unsupported activity type {other:?}"),
                })
            }
        };
        activities.push(activity);
    }
    if activities.is_empty() {
        return Err(Error::InvalidStep {
            step_name: step_name.to_string(),
            message: "a step must carry at least one activity".to_string(),
        });
    }

    let next = store
        .child_names(&format!("{step_prefix}next/"))
        .await?;
    let on_failure = store
        .child_names(&format!("{step_prefix}on-failure/"))
        .await?;

    Ok(StepDefinition {
        node,
        activities,
        next,
        on_failure,
    })
}

/// Materialises a whole workflow definition.
///
/// # Errors
///
/// Returns [`Error::WorkflowNotFound`] when the workflow has no steps, or
/// step errors from [`get_workflow_step`].
pub async fn get_workflow(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    workflow_name: &str,
) -> Result<WorkflowDefinition> {
    let steps_prefix = format!("{}steps/", paths::workflow_prefix(deployment_id, workflow_name));
    let step_names = store.child_names(&steps_prefix).await?;
    if step_names.is_empty() {
        return Err(Error::WorkflowNotFound {
            workflow_name: workflow_name.to_string(),
        });
    }

    let mut steps = BTreeMap::new();
    for step_name in step_names {
        let step = get_workflow_step(store, deployment_id, workflow_name, &step_name).await?;
        steps.insert(step_name, step);
    }

    let mut inputs = BTreeMap::new();
    let inputs_prefix = format!("{}inputs/", paths::workflow_prefix(deployment_id, workflow_name));
    for input_name in store.child_names(&inputs_prefix).await? {
        let required = store
            .get_string(&format!("{inputs_prefix}{input_name}/required"))
            .await?
            .as_deref()
            != Some("false");
        let default = store
            .get_string(&format!("{inputs_prefix}{input_name}/default"))
            .await?;
        inputs.insert(input_name, WorkflowInput { required, default });
    }

    Ok(WorkflowDefinition {
        name: workflow_name.to_string(),
        steps,
        inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use maestro_core::MemoryKvStore;

    fn dep() -> DeploymentId {
        DeploymentId::new("dep-1").unwrap()
    }

    async fn seed(store: &MemoryKvStore, key: &str, value: &str) {
        store.set(key, Bytes::from(value.to_string())).await.unwrap();
    }

    const WF: &str = "_maestro/deployments/dep-1/workflows/install";

    #[tokio::test]
    async fn reads_steps_activities_and_edges() {
        let store = MemoryKvStore::new();
        seed(&store, &format!("{WF}/steps/create/node"), "compute").await;
        seed(&store, &format!("{WF}/steps/create/activity/delegate"), "install").await;
        seed(&store, &format!("{WF}/steps/create/next/start"), "").await;
        seed(&store, &format!("{WF}/steps/start/node"), "compute").await;
        seed(&store, &format!("{WF}/steps/start/activity/set-state"), "started").await;

        let wf = get_workflow(&store, &dep(), "install").await.unwrap();
        assert_eq!(wf.steps.len(), 2);

        let create = &wf.steps["create"];
        assert_eq!(create.node.as_deref(), Some("compute"));
        assert_eq!(create.activities, vec![Activity::Delegate("install".into())]);
        assert_eq!(create.next, vec!["start"]);

        let start = &wf.steps["start"];
        assert_eq!(start.activities, vec![Activity::SetState("started".into())]);
        assert!(start.next.is_empty());
    }

    #[tokio::test]
    async fn step_without_activity_is_invalid() {
        let store = MemoryKvStore::new();
        seed(&store, &format!("{WF}/steps/broken/node"), "compute").await;

        let err = get_workflow(&store, &dep(), "install").await.unwrap_err();
        assert!(matches!(err, Error::InvalidStep { .. }));
    }

    #[tokio::test]
    async fn unknown_activity_kind_is_invalid() {
        let store = MemoryKvStore::new();
        seed(&store, &format!("{WF}/steps/broken/activity/teleport"), "x").await;

        let err = get_workflow(&store, &dep(), "install").await.unwrap_err();
        assert!(matches!(err, Error::InvalidStep { .. }));
    }

    #[tokio::test]
    async fn missing_workflow_is_not_found() {
        let store = MemoryKvStore::new();
        let err = get_workflow(&store, &dep(), "ghost").await.unwrap_err();
        assert!(matches!(err, Error::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn inputs_carry_requiredness_and_defaults() {
        let store = MemoryKvStore::new();
        seed(&store, &format!("{WF}/steps/s/activity/set-state"), "started").await;
        seed(&store, &format!("{WF}/inputs/user/required"), "true").await;
        seed(&store, &format!("{WF}/inputs/retries/required"), "false").await;
        seed(&store, &format!("{WF}/inputs/retries/default"), "3").await;

        let wf = get_workflow(&store, &dep(), "install").await.unwrap();
        assert!(wf.inputs["user"].required);
        assert!(!wf.inputs["retries"].required);
        assert_eq!(wf.inputs["retries"].default.as_deref(), Some("3"));
    }
}
