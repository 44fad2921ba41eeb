//! The executor registry.
//!
//! Two tables: delegate executors keyed by TOSCA node type (or any
//! ancestor prefix, longest match wins) and operation executors keyed by
//! implementation artifact kind. Registration records where the executor
//! came from (built-in adapter or loaded plugin) for diagnostics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::context::{DelegateExecutor, OperationExecutor};
use crate::error::{Error, Result};

/// Where a registered executor came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorOrigin {
    /// Compiled into the server.
    BuiltIn,
    /// Loaded from an out-of-process plugin.
    Plugin(PathBuf),
}

impl std::fmt::Display for ExecutorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("built-in"),
            Self::Plugin(path) => write!(f, "plugin {}", path.display()),
        }
    }
}

struct DelegateEntry {
    type_prefix: String,
    executor: Arc<dyn DelegateExecutor>,
    origin: ExecutorOrigin,
}

struct OperationEntry {
    executor: Arc<dyn OperationExecutor>,
    origin: ExecutorOrigin,
}

/// Registry mapping node types and artifact kinds to executors.
#[derive(Default)]
pub struct ExecutorRegistry {
    delegates: RwLock<Vec<DelegateEntry>>,
    operations: RwLock<HashMap<String, OperationEntry>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a delegate executor for a set of node types or type
    /// prefixes.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register_delegates<I, S>(
        &self,
        type_prefixes: I,
        executor: Arc<dyn DelegateExecutor>,
        origin: ExecutorOrigin,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut delegates = self.delegates.write().expect("delegate table poisoned");
        for type_prefix in type_prefixes {
            let type_prefix = type_prefix.into();
            tracing::debug!(type_prefix = %type_prefix, origin = %origin, "delegate executor registered");
            delegates.push(DelegateEntry {
                type_prefix,
                executor: Arc::clone(&executor),
                origin: origin.clone(),
            });
        }
    }

    /// Registers an operation executor for a set of artifact kinds.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register_operations<I, S>(
        &self,
        artifact_kinds: I,
        executor: Arc<dyn OperationExecutor>,
        origin: ExecutorOrigin,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut operations = self.operations.write().expect("operation table poisoned");
        for kind in artifact_kinds {
            let kind = kind.into().to_ascii_lowercase();
            tracing::debug!(artifact_kind = %kind, origin = %origin, "operation executor registered");
            operations.insert(
                kind,
                OperationEntry {
                    executor: Arc::clone(&executor),
                    origin: origin.clone(),
                },
            );
        }
    }

    /// Looks up the delegate executor for a node type.
    ///
    /// A registered prefix matches the exact type or any dotted ancestor
    /// (`custom.nodes` matches `custom.nodes.App`); the longest match wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoExecutor`] when nothing matches.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn delegate_executor(&self, node_type: &str) -> Result<Arc<dyn DelegateExecutor>> {
        let delegates = self.delegates.read().expect("delegate table poisoned");
        delegates
            .iter()
            .filter(|entry| {
                node_type == entry.type_prefix
                    || node_type.starts_with(&format!("{}.", entry.type_prefix))
            })
            .max_by_key(|entry| entry.type_prefix.len())
            .map(|entry| Arc::clone(&entry.executor))
            .ok_or_else(|| Error::NoExecutor {
                kind: "node type",
                key: node_type.to_string(),
            })
    }

    /// Looks up the operation executor for an artifact kind
    /// (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoExecutor`] when nothing matches.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn operation_executor(&self, artifact_kind: &str) -> Result<Arc<dyn OperationExecutor>> {
        let operations = self.operations.read().expect("operation table poisoned");
        operations
            .get(&artifact_kind.to_ascii_lowercase())
            .map(|entry| Arc::clone(&entry.executor))
            .ok_or_else(|| Error::NoExecutor {
                kind: "artifact",
                key: artifact_kind.to_string(),
            })
    }

    /// Lists registered delegate prefixes with their origins, for
    /// diagnostics.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn delegate_registrations(&self) -> Vec<(String, ExecutorOrigin)> {
        self.delegates
            .read()
            .expect("delegate table poisoned")
            .iter()
            .map(|entry| (entry.type_prefix.clone(), entry.origin.clone()))
            .collect()
    }

    /// Lists registered artifact kinds with their origins, for
    /// diagnostics.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn operation_registrations(&self) -> Vec<(String, ExecutorOrigin)> {
        self.operations
            .read()
            .expect("operation table poisoned")
            .iter()
            .map(|(kind, entry)| (kind.clone(), entry.origin.clone()))
            .collect()
    }
}

/// Maps an implementation artifact's file extension to its artifact kind.
///
/// Used when an operation implementation carries no explicit `type`.
#[must_use]
pub fn artifact_kind_for_extension(primary: &str) -> Option<&'static str> {
    let extension = primary.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension {
        "sh" => Some("tosca.artifacts.Implementation.Bash"),
        "py" => Some("tosca.artifacts.Implementation.Python"),
        "yml" | "yaml" => Some("maestro.artifacts.Implementation.Ansible"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExecutionContext, Operation};
    use crate::inputs::EnvInput;
    use async_trait::async_trait;

    struct NoopDelegate;

    #[async_trait]
    impl DelegateExecutor for NoopDelegate {
        fn supported_types(&self) -> Vec<String> {
            vec!["tosca.nodes.Compute".to_string()]
        }

        async fn exec_delegate(
            &self,
            _ctx: &ExecutionContext,
            _node_name: &str,
            _delegate_operation: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct NoopOperation;

    #[async_trait]
    impl OperationExecutor for NoopOperation {
        fn supported_artifacts(&self) -> Vec<String> {
            vec!["tosca.artifacts.Implementation.Bash".to_string()]
        }

        async fn exec_operation(
            &self,
            _ctx: &ExecutionContext,
            _operation: &Operation,
            _env_inputs: &[EnvInput],
            _var_input_names: &[String],
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let registry = ExecutorRegistry::new();
        registry.register_delegates(
            ["tosca.nodes"],
            Arc::new(NoopDelegate),
            ExecutorOrigin::BuiltIn,
        );
        registry.register_delegates(
            ["tosca.nodes.Compute"],
            Arc::new(NoopDelegate),
            ExecutorOrigin::Plugin(PathBuf::from("/plugins/openstack")),
        );

        // Both match; the more specific registration wins.
        assert!(registry.delegate_executor("tosca.nodes.Compute").is_ok());
        assert!(registry
            .delegate_executor("tosca.nodes.Compute.Big")
            .is_ok());
        // Only the generic prefix matches.
        assert!(registry.delegate_executor("tosca.nodes.Network").is_ok());

        let registrations = registry.delegate_registrations();
        assert_eq!(registrations.len(), 2);
        assert!(registrations
            .iter()
            .any(|(_, origin)| matches!(origin, ExecutorOrigin::Plugin(_))));
    }

    #[test]
    fn prefix_must_align_on_dotted_segments() {
        let registry = ExecutorRegistry::new();
        registry.register_delegates(
            ["tosca.nodes.Comp"],
            Arc::new(NoopDelegate),
            ExecutorOrigin::BuiltIn,
        );

        // "tosca.nodes.Compute" does not start with "tosca.nodes.Comp.".
        let result = registry.delegate_executor("tosca.nodes.Compute");
        assert!(matches!(result, Err(Error::NoExecutor { .. })));
    }

    #[test]
    fn operation_lookup_is_case_insensitive() {
        let registry = ExecutorRegistry::new();
        registry.register_operations(
            ["tosca.artifacts.Implementation.Bash"],
            Arc::new(NoopOperation),
            ExecutorOrigin::BuiltIn,
        );

        assert!(registry
            .operation_executor("tosca.artifacts.implementation.bash")
            .is_ok());
        assert!(registry
            .operation_executor("maestro.artifacts.Implementation.Kubernetes")
            .is_err());
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(
            artifact_kind_for_extension("scripts/start.sh"),
            Some("tosca.artifacts.Implementation.Bash")
        );
        assert_eq!(
            artifact_kind_for_extension("playbooks/deploy.yml"),
            Some("maestro.artifacts.Implementation.Ansible")
        );
        assert_eq!(artifact_kind_for_extension("binary"), None);
        assert_eq!(artifact_kind_for_extension("archive.tar"), None);
    }
}
