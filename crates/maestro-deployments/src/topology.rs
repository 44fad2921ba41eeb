//! Topology document ingestion.
//!
//! The REST surface accepts a JSON topology document (the content of a
//! TOSCA archive after unpacking, which is an external collaborator's job)
//! and this module decomposes it into the store layout: one key per scalar
//! leaf, so later reads and writes can be partial.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_core::{DeploymentId, KvStore, Publisher};

use crate::deployment::{set_deployment_status, DeploymentStatus};
use crate::error::Result;
use crate::nodes::InstanceState;
use crate::paths;
use crate::values;

/// A TOSCA type definition in document form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDocument {
    /// Parent type.
    pub derived_from: Option<String>,
    /// Property definitions (`type`, `required`, `default`, ...).
    pub properties: BTreeMap<String, Value>,
    /// Attribute definitions.
    pub attributes: BTreeMap<String, Value>,
    /// Capability definitions (`type`, ...).
    pub capabilities: BTreeMap<String, Value>,
    /// Interfaces (`<iface>/<op>/implementation/...`).
    pub interfaces: BTreeMap<String, Value>,
}

/// A node template in document form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDocument {
    /// The node's TOSCA type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Property assignments.
    pub properties: BTreeMap<String, Value>,
    /// Capability assignments.
    pub capabilities: BTreeMap<String, Value>,
    /// Requirements (`relationship`, `node`).
    pub requirements: Vec<BTreeMap<String, Value>>,
    /// Number of initial instances.
    pub instances: Option<u32>,
}

/// A workflow step in document form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDocument {
    /// Target node.
    pub node: Option<String>,
    /// Activities keyed by kind (`delegate`, `set-state`, `operation`,
    /// `inline`).
    pub activity: BTreeMap<String, String>,
    /// Successor steps.
    pub next: Vec<String>,
    /// Failure-path successors.
    #[serde(rename = "on-failure")]
    pub on_failure: Vec<String>,
}

/// A workflow in document form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDocument {
    /// Steps keyed by name.
    pub steps: BTreeMap<String, StepDocument>,
    /// Inputs keyed by name (`required`, `default`).
    pub inputs: BTreeMap<String, Value>,
}

/// A complete topology document, as submitted through the REST surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyDocument {
    /// Type definitions keyed by type name.
    pub types: BTreeMap<String, TypeDocument>,
    /// Node templates keyed by node name.
    pub nodes: BTreeMap<String, NodeDocument>,
    /// Workflows keyed by workflow name.
    pub workflows: BTreeMap<String, WorkflowDocument>,
}

/// Stores a topology document under the deployment's subtree and creates
/// the initial instances.
///
/// Writes are fanned out through the bounded publisher; the deployment
/// status is set to `INITIAL` last so readers never observe a deployment
/// whose topology is still being written.
///
/// # Errors
///
/// Returns the first write error observed.
pub async fn store_topology(
    store: std::sync::Arc<dyn KvStore>,
    deployment_id: &DeploymentId,
    document: &TopologyDocument,
) -> Result<()> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for (type_name, type_doc) in &document.types {
        let prefix = paths::type_prefix(deployment_id, type_name);
        pairs.push((format!("{prefix}name"), type_name.clone()));
        if let Some(parent) = &type_doc.derived_from {
            pairs.push((format!("{prefix}derived_from"), parent.clone()));
        }
        for (section, entries) in [
            ("properties", &type_doc.properties),
            ("attributes", &type_doc.attributes),
            ("capabilities", &type_doc.capabilities),
            ("interfaces", &type_doc.interfaces),
        ] {
            for (name, value) in entries {
                values::flatten_value(&format!("{prefix}{section}/{name}"), value, &mut pairs);
            }
        }
    }

    for (node_name, node_doc) in &document.nodes {
        let prefix = paths::node_prefix(deployment_id, node_name);
        pairs.push((format!("{prefix}type"), node_doc.type_name.clone()));
        for (name, value) in &node_doc.properties {
            values::flatten_value(&format!("{prefix}properties/{name}"), value, &mut pairs);
        }
        for (name, value) in &node_doc.capabilities {
            values::flatten_value(&format!("{prefix}capabilities/{name}"), value, &mut pairs);
        }
        for (idx, requirement) in node_doc.requirements.iter().enumerate() {
            for (field, value) in requirement {
                values::flatten_value(
                    &format!("{prefix}requirements/{idx}/{field}"),
                    value,
                    &mut pairs,
                );
            }
        }

        let count = node_doc.instances.unwrap_or(1);
        for instance in 0..count {
            pairs.push((
                paths::instance_state_key(deployment_id, node_name, &instance.to_string()),
                InstanceState::Initial.as_str().to_string(),
            ));
        }
    }

    for (workflow_name, workflow) in &document.workflows {
        let prefix = paths::workflow_prefix(deployment_id, workflow_name);
        for (step_name, step) in &workflow.steps {
            let step_prefix = format!("{prefix}steps/{step_name}/");
            if let Some(node) = &step.node {
                pairs.push((format!("{step_prefix}node"), node.clone()));
            }
            for (kind, value) in &step.activity {
                pairs.push((format!("{step_prefix}activity/{kind}"), value.clone()));
            }
            for next in &step.next {
                pairs.push((format!("{step_prefix}next/{next}"), String::new()));
            }
            for failure in &step.on_failure {
                pairs.push((format!("{step_prefix}on-failure/{failure}"), String::new()));
            }
        }
        for (input_name, value) in &workflow.inputs {
            values::flatten_value(&format!("{prefix}inputs/{input_name}"), value, &mut pairs);
        }
    }

    let publisher = Publisher::new(std::sync::Arc::clone(&store));
    for (key, value) in pairs {
        publisher.store_string(key, value).await;
    }
    publisher.wait().await?;

    set_deployment_status(store.as_ref(), deployment_id, DeploymentStatus::Initial).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::get_deployment_status;
    use crate::nodes;
    use crate::workflows;
    use maestro_core::MemoryKvStore;
    use std::sync::Arc;

    fn dep() -> DeploymentId {
        DeploymentId::new("dep-1").unwrap()
    }

    fn sample_document() -> TopologyDocument {
        serde_json::from_value(serde_json::json!({
            "types": {
                "tosca.nodes.Compute": {
                    "capabilities": {"endpoint": {"type": "tosca.capabilities.Endpoint"}}
                },
                "tosca.capabilities.Endpoint": {
                    "properties": {"port": {"type": "integer", "default": 80}}
                }
            },
            "nodes": {
                "compute": {"type": "tosca.nodes.Compute", "instances": 2},
                "web": {
                    "type": "tosca.nodes.Compute",
                    "requirements": [
                        {"relationship": "tosca.relationships.HostedOn", "node": "compute"}
                    ]
                }
            },
            "workflows": {
                "install": {
                    "steps": {
                        "compute_install": {
                            "node": "compute",
                            "activity": {"delegate": "install"},
                            "next": ["compute_started"]
                        },
                        "compute_started": {
                            "node": "compute",
                            "activity": {"set-state": "started"}
                        }
                    }
                }
            }
        }))
        .expect("valid document")
    }

    #[tokio::test]
    async fn ingestion_creates_types_nodes_instances_and_workflows() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let id = dep();
        store_topology(Arc::clone(&store), &id, &sample_document())
            .await
            .unwrap();

        assert_eq!(
            get_deployment_status(store.as_ref(), &id).await.unwrap(),
            DeploymentStatus::Initial
        );
        assert_eq!(
            nodes::get_node_type(store.as_ref(), &id, "compute")
                .await
                .unwrap(),
            "tosca.nodes.Compute"
        );
        assert_eq!(
            nodes::get_node_instances_ids(store.as_ref(), &id, "compute")
                .await
                .unwrap(),
            vec!["0", "1"]
        );
        assert_eq!(
            nodes::get_hosted_on_node(store.as_ref(), &id, "web")
                .await
                .unwrap(),
            Some("compute".to_string())
        );

        let wf = workflows::get_workflow(store.as_ref(), &id, "install")
            .await
            .unwrap();
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps["compute_install"].next, vec!["compute_started"]);
    }

    #[tokio::test]
    async fn default_instance_count_is_one() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let id = dep();
        store_topology(Arc::clone(&store), &id, &sample_document())
            .await
            .unwrap();

        assert_eq!(
            nodes::get_node_instances_ids(store.as_ref(), &id, "web")
                .await
                .unwrap(),
            vec!["0"]
        );
    }
}
