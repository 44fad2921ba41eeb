//! Deployment lifecycle status and subtree management.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use maestro_core::{DeploymentId, KvLock, KvStore};

use crate::error::{Error, Result};
use crate::paths;

/// Lifecycle status of a deployment.
///
/// Stored on the wire as the SCREAMING_SNAKE names below; unknown values
/// are rejected at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Created, nothing submitted yet.
    Initial,
    /// A deploy task is executing.
    DeploymentInProgress,
    /// The topology reached its desired state.
    Deployed,
    /// An undeploy task is executing.
    UndeploymentInProgress,
    /// The topology was torn down.
    Undeployed,
    /// An update is being applied.
    UpdateInProgress,
    /// The last lifecycle task failed.
    Failed,
    /// The deployment subtree is being removed.
    Purged,
}

impl DeploymentStatus {
    /// Returns the wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::DeploymentInProgress => "DEPLOYMENT_IN_PROGRESS",
            Self::Deployed => "DEPLOYED",
            Self::UndeploymentInProgress => "UNDEPLOYMENT_IN_PROGRESS",
            Self::Undeployed => "UNDEPLOYED",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::Failed => "FAILED",
            Self::Purged => "PURGED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INITIAL" => Ok(Self::Initial),
            "DEPLOYMENT_IN_PROGRESS" => Ok(Self::DeploymentInProgress),
            "DEPLOYED" => Ok(Self::Deployed),
            "UNDEPLOYMENT_IN_PROGRESS" => Ok(Self::UndeploymentInProgress),
            "UNDEPLOYED" => Ok(Self::Undeployed),
            "UPDATE_IN_PROGRESS" => Ok(Self::UpdateInProgress),
            "FAILED" => Ok(Self::Failed),
            "PURGED" => Ok(Self::Purged),
            other => Err(Error::InvalidEnumValue {
                kind: "deployment status",
                value: other.to_string(),
            }),
        }
    }
}

/// Returns true if the deployment subtree exists.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn deployment_exists(store: &dyn KvStore, deployment_id: &DeploymentId) -> Result<bool> {
    Ok(store
        .exists(&paths::status_key(deployment_id))
        .await?)
}

/// Reads the deployment status.
///
/// # Errors
///
/// Returns [`Error::DeploymentNotFound`] when the deployment is absent and
/// [`Error::InvalidEnumValue`] on a corrupt stored status.
pub async fn get_deployment_status(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
) -> Result<DeploymentStatus> {
    let raw = store
        .get_string(&paths::status_key(deployment_id))
        .await?
        .ok_or_else(|| Error::DeploymentNotFound {
            deployment_id: deployment_id.to_string(),
        })?;
    raw.parse()
}

/// Writes the deployment status.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn set_deployment_status(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    status: DeploymentStatus,
) -> Result<()> {
    store
        .set(
            &paths::status_key(deployment_id),
            Bytes::from(status.as_str()),
        )
        .await?;
    Ok(())
}

/// Lists all known deployment IDs.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn list_deployments(store: &dyn KvStore) -> Result<Vec<DeploymentId>> {
    let prefix = format!("{}/", paths::DEPLOYMENTS_PREFIX);
    let names = store.child_names(&prefix).await?;
    Ok(names
        .into_iter()
        .filter(|name| !name.starts_with('.'))
        .map(DeploymentId::new_unchecked)
        .collect())
}

/// Removes the whole deployment subtree.
///
/// Serialised against concurrent purge/update through the per-deployment
/// lock; the status is flipped to `PURGED` before the recursive delete so a
/// reader that races the removal sees a terminal status rather than a
/// half-missing tree.
///
/// # Errors
///
/// Returns a lock acquisition or storage error.
pub async fn purge_deployment(
    store: Arc<dyn KvStore>,
    deployment_id: &DeploymentId,
) -> Result<()> {
    let lock = KvLock::new(Arc::clone(&store), paths::deployment_lock_key(deployment_id));
    let guard = lock
        .acquire_with_operation(
            Duration::from_secs(30),
            Duration::from_secs(60),
            Some("purge".into()),
        )
        .await?;

    set_deployment_status(store.as_ref(), deployment_id, DeploymentStatus::Purged).await?;
    store
        .delete_tree(&paths::deployment_prefix(deployment_id))
        .await?;

    guard.release().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MemoryKvStore;

    fn dep(id: &str) -> DeploymentId {
        DeploymentId::new(id).unwrap()
    }

    #[test]
    fn status_wire_names_roundtrip() {
        for status in [
            DeploymentStatus::Initial,
            DeploymentStatus::DeploymentInProgress,
            DeploymentStatus::Deployed,
            DeploymentStatus::UndeploymentInProgress,
            DeploymentStatus::Undeployed,
            DeploymentStatus::UpdateInProgress,
            DeploymentStatus::Failed,
            DeploymentStatus::Purged,
        ] {
            let parsed: DeploymentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("DEPLOYING".parse::<DeploymentStatus>().is_err());
    }

    #[tokio::test]
    async fn status_read_write() {
        let store = MemoryKvStore::new();
        let id = dep("dep-1");

        assert!(!deployment_exists(&store, &id).await.unwrap());
        assert!(matches!(
            get_deployment_status(&store, &id).await,
            Err(Error::DeploymentNotFound { .. })
        ));

        set_deployment_status(&store, &id, DeploymentStatus::Deployed)
            .await
            .unwrap();
        assert!(deployment_exists(&store, &id).await.unwrap());
        assert_eq!(
            get_deployment_status(&store, &id).await.unwrap(),
            DeploymentStatus::Deployed
        );
    }

    #[tokio::test]
    async fn list_skips_internal_entries() {
        let store = MemoryKvStore::new();
        set_deployment_status(&store, &dep("a"), DeploymentStatus::Initial)
            .await
            .unwrap();
        set_deployment_status(&store, &dep("b"), DeploymentStatus::Deployed)
            .await
            .unwrap();
        store
            .set("_maestro/deployments/.locks/a", Bytes::from("{}"))
            .await
            .unwrap();

        let ids = list_deployments(&store).await.unwrap();
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn purge_removes_subtree() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let id = dep("dep-1");
        set_deployment_status(store.as_ref(), &id, DeploymentStatus::Deployed)
            .await
            .unwrap();
        store
            .set(
                "_maestro/deployments/dep-1/topology/nodes/web/type",
                Bytes::from("custom.nodes.App"),
            )
            .await
            .unwrap();

        purge_deployment(Arc::clone(&store), &id).await.unwrap();
        assert!(!deployment_exists(store.as_ref(), &id).await.unwrap());
    }
}
