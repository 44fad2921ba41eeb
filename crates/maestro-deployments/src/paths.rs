//! Key-path helpers for the deployment subtree.
//!
//! Everything a deployment owns lives under `_maestro/deployments/<id>/`,
//! decomposed into one key per scalar leaf. These helpers are the single
//! source of truth for that layout.

use maestro_core::DeploymentId;

/// Root prefix for all deployment subtrees.
pub const DEPLOYMENTS_PREFIX: &str = "_maestro/deployments";

/// Prefix of one deployment's subtree (with trailing slash).
#[must_use]
pub fn deployment_prefix(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/")
}

/// Key holding the deployment status.
#[must_use]
pub fn status_key(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/status")
}

/// Prefix of the topology `types` subtree.
#[must_use]
pub fn types_prefix(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/types/")
}

/// Prefix of one type's definition.
#[must_use]
pub fn type_prefix(deployment_id: &DeploymentId, type_name: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/types/{type_name}/")
}

/// Prefix of the topology `nodes` subtree.
#[must_use]
pub fn nodes_prefix(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/nodes/")
}

/// Prefix of one node template.
#[must_use]
pub fn node_prefix(deployment_id: &DeploymentId, node_name: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/nodes/{node_name}/")
}

/// Prefix of one node's instances.
#[must_use]
pub fn node_instances_prefix(deployment_id: &DeploymentId, node_name: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/instances/{node_name}/")
}

/// Prefix of a single instance.
#[must_use]
pub fn instance_prefix(deployment_id: &DeploymentId, node_name: &str, instance_id: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/instances/{node_name}/{instance_id}/")
}

/// Key holding an instance's lifecycle state.
#[must_use]
pub fn instance_state_key(
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
) -> String {
    format!(
        "{DEPLOYMENTS_PREFIX}/{deployment_id}/topology/instances/{node_name}/{instance_id}/state"
    )
}

/// Prefix of the workflows subtree.
#[must_use]
pub fn workflows_prefix(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/workflows/")
}

/// Prefix of one workflow definition.
#[must_use]
pub fn workflow_prefix(deployment_id: &DeploymentId, workflow_name: &str) -> String {
    format!("{DEPLOYMENTS_PREFIX}/{deployment_id}/workflows/{workflow_name}/")
}

/// Lock key serialising purge and update on a deployment.
#[must_use]
pub fn deployment_lock_key(deployment_id: &DeploymentId) -> String {
    format!("{DEPLOYMENTS_PREFIX}/.locks/{deployment_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let id = DeploymentId::new("dep-1").unwrap();
        assert_eq!(deployment_prefix(&id), "_maestro/deployments/dep-1/");
        assert_eq!(status_key(&id), "_maestro/deployments/dep-1/status");
        assert_eq!(
            type_prefix(&id, "tosca.nodes.Compute"),
            "_maestro/deployments/dep-1/topology/types/tosca.nodes.Compute/"
        );
        assert_eq!(
            instance_state_key(&id, "web", "0"),
            "_maestro/deployments/dep-1/topology/instances/web/0/state"
        );
        assert_eq!(
            workflow_prefix(&id, "install"),
            "_maestro/deployments/dep-1/workflows/install/"
        );
    }
}
