//! Node templates, runtime instances and `HostedOn` traversal.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use maestro_core::{DeploymentId, KvStore, Publisher};

use crate::error::{Error, Result};
use crate::paths;
use crate::types;

/// The canonical hosting relationship type.
pub const HOSTED_ON_RELATIONSHIP: &str = "tosca.relationships.HostedOn";

/// Lifecycle state of a node instance.
///
/// Stored as the lowercase wire names; unknown values are rejected at read
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Not yet touched by any workflow.
    Initial,
    /// Create operation in progress.
    Creating,
    /// Created, not configured.
    Created,
    /// Configure operation in progress.
    Configuring,
    /// Configured, not started.
    Configured,
    /// Start operation in progress.
    Starting,
    /// Up and running.
    Started,
    /// Stop operation in progress.
    Stopping,
    /// Stopped.
    Stopped,
    /// Delete operation in progress.
    Deleting,
    /// Deleted.
    Deleted,
    /// A lifecycle operation failed.
    Error,
}

impl InstanceState {
    /// Returns the wire name of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initial" => Ok(Self::Initial),
            "creating" => Ok(Self::Creating),
            "created" => Ok(Self::Created),
            "configuring" => Ok(Self::Configuring),
            "configured" => Ok(Self::Configured),
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidEnumValue {
                kind: "instance state",
                value: other.to_string(),
            }),
        }
    }
}

/// Returns true if the node template exists.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn node_exists(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
) -> Result<bool> {
    store
        .exists(&format!("{}type", paths::node_prefix(deployment_id, node_name)))
        .await
        .map_err(Error::from)
}

/// Returns the TOSCA type of a node template.
///
/// # Errors
///
/// Returns [`Error::NodeNotFound`] when the node is absent.
pub async fn get_node_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
) -> Result<String> {
    store
        .get_string(&format!("{}type", paths::node_prefix(deployment_id, node_name)))
        .await?
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::NodeNotFound {
            node_name: node_name.to_string(),
        })
}

/// Lists all node template names in the topology.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_node_names(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
) -> Result<Vec<String>> {
    Ok(store
        .child_names(&paths::nodes_prefix(deployment_id))
        .await?)
}

/// Returns the capability type of a node capability, walking the node's
/// type hierarchy.
///
/// # Errors
///
/// Returns [`Error::NodeNotFound`] when the node is absent.
pub async fn get_node_capability_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    capability_name: &str,
) -> Result<Option<String>> {
    let node_type = get_node_type(store, deployment_id, node_name).await?;
    types::get_type_capability_type(store, deployment_id, &node_type, capability_name).await
}

/// Returns the target of the node's `HostedOn` requirement, or `None`.
///
/// Requirements are stored as
/// `nodes/<n>/requirements/<idx>/{node, relationship}`; the hosting
/// requirement is the one whose relationship type derives from
/// [`HOSTED_ON_RELATIONSHIP`].
///
/// # Errors
///
/// Returns [`Error::NodeNotFound`] when the node is absent, or a type
/// error from the relationship walk.
pub async fn get_hosted_on_node(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
) -> Result<Option<String>> {
    if !node_exists(store, deployment_id, node_name).await? {
        return Err(Error::NodeNotFound {
            node_name: node_name.to_string(),
        });
    }
    let reqs_prefix = format!("{}requirements/", paths::node_prefix(deployment_id, node_name));
    for idx in store.child_names(&reqs_prefix).await? {
        let relationship = store
            .get_string(&format!("{reqs_prefix}{idx}/relationship"))
            .await?
            .filter(|r| !r.is_empty());
        let Some(relationship) = relationship else {
            continue;
        };
        let hosting = relationship == HOSTED_ON_RELATIONSHIP
            || (types::type_exists(store, deployment_id, &relationship).await?
                && types::is_type_derived_from(
                    store,
                    deployment_id,
                    &relationship,
                    HOSTED_ON_RELATIONSHIP,
                )
                .await?);
        if hosting {
            return Ok(store
                .get_string(&format!("{reqs_prefix}{idx}/node"))
                .await?
                .filter(|n| !n.is_empty()));
        }
    }
    Ok(None)
}

/// Lists the instance IDs of a node, sorted numerically where possible.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_node_instances_ids(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
) -> Result<Vec<String>> {
    let mut ids = store
        .child_names(&paths::node_instances_prefix(deployment_id, node_name))
        .await?;
    ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
    Ok(ids)
}

/// Reads an instance's lifecycle state.
///
/// # Errors
///
/// Returns [`Error::Core`] with a not-found when the instance has no state
/// key, or [`Error::InvalidEnumValue`] on a corrupt value.
pub async fn get_instance_state(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
) -> Result<InstanceState> {
    let key = paths::instance_state_key(deployment_id, node_name, instance_id);
    let raw = store
        .get_string(&key)
        .await?
        .ok_or_else(|| maestro_core::Error::NotFound(key))?;
    raw.parse()
}

/// Writes an instance's lifecycle state.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn set_instance_state(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    state: InstanceState,
) -> Result<()> {
    store
        .set(
            &paths::instance_state_key(deployment_id, node_name, instance_id),
            Bytes::from(state.as_str()),
        )
        .await?;
    Ok(())
}

/// Writes an attribute on a single instance.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn set_instance_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    attribute_name: &str,
    value: &str,
) -> Result<()> {
    let key = format!(
        "{}attributes/{attribute_name}",
        paths::instance_prefix(deployment_id, node_name, instance_id)
    );
    store.set(&key, Bytes::from(value.to_string())).await?;
    Ok(())
}

/// Writes the same attribute value on every instance of a node, fanned out
/// through the bounded publisher.
///
/// # Errors
///
/// Returns the first write error observed.
pub async fn set_attribute_for_all_instances(
    store: Arc<dyn KvStore>,
    deployment_id: &DeploymentId,
    node_name: &str,
    attribute_name: &str,
    value: &str,
) -> Result<()> {
    let ids = get_node_instances_ids(store.as_ref(), deployment_id, node_name).await?;
    let publisher = Publisher::new(Arc::clone(&store));
    for instance_id in &ids {
        let key = format!(
            "{}attributes/{attribute_name}",
            paths::instance_prefix(deployment_id, node_name, instance_id)
        );
        publisher.store_string(key, value).await;
    }
    publisher.wait().await?;
    Ok(())
}

/// Writes the same capability attribute value on every instance of a node.
///
/// # Errors
///
/// Returns the first write error observed.
pub async fn set_capability_attribute_for_all_instances(
    store: Arc<dyn KvStore>,
    deployment_id: &DeploymentId,
    node_name: &str,
    capability_name: &str,
    attribute_name: &str,
    value: &str,
) -> Result<()> {
    let ids = get_node_instances_ids(store.as_ref(), deployment_id, node_name).await?;
    let publisher = Publisher::new(Arc::clone(&store));
    for instance_id in &ids {
        let key = format!(
            "{}capabilities/{capability_name}/attributes/{attribute_name}",
            paths::instance_prefix(deployment_id, node_name, instance_id)
        );
        publisher.store_string(key, value).await;
    }
    publisher.wait().await?;
    Ok(())
}
