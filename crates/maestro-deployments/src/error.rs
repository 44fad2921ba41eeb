//! Error types for the deployment data model.

/// The result type used throughout maestro-deployments.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur reading or writing deployment state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A deployment does not exist.
    #[error("deployment not found: {deployment_id}")]
    DeploymentNotFound {
        /// The deployment that was looked up.
        deployment_id: String,
    },

    /// A TOSCA type referenced by a node or another type does not exist.
    #[error("type not found: {type_name}")]
    TypeNotFound {
        /// The missing type name.
        type_name: String,
    },

    /// A node template does not exist in the topology.
    #[error("node not found: {node_name}")]
    NodeNotFound {
        /// The missing node name.
        node_name: String,
    },

    /// A type capability definition is missing its mandatory `type` key.
    #[error("missing \"type\" key for capability {capability} of type {type_name}")]
    MissingCapabilityType {
        /// The type carrying the broken definition.
        type_name: String,
        /// The capability definition name.
        capability: String,
    },

    /// A required property has no value and no default in the hierarchy.
    #[error("missing value for required property {property} of {context}")]
    MissingRequiredProperty {
        /// The property name.
        property: String,
        /// What declared the property (type or node).
        context: String,
    },

    /// A stored enum value is not a member of its enum.
    #[error("invalid {kind} value: {value}")]
    InvalidEnumValue {
        /// The enum kind (e.g. "deployment status", "instance state").
        kind: &'static str,
        /// The offending stored value.
        value: String,
    },

    /// A TOSCA function expression could not be parsed or evaluated.
    #[error("invalid function expression: {message}")]
    InvalidFunction {
        /// Description of the problem.
        message: String,
    },

    /// A workflow does not exist in the deployment.
    #[error("workflow not found: {workflow_name}")]
    WorkflowNotFound {
        /// The missing workflow name.
        workflow_name: String,
    },

    /// A workflow step definition is structurally broken.
    #[error("invalid step {step_name}: {message}")]
    InvalidStep {
        /// The broken step.
        step_name: String,
        /// Description of the problem.
        message: String,
    },

    /// An error from the coordination store.
    #[error("core error: {0}")]
    Core(#[from] maestro_core::Error),
}

impl Error {
    /// Returns true for "entity absent" errors (deployment, type, node,
    /// workflow), which REST maps to 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeploymentNotFound { .. }
                | Self::TypeNotFound { .. }
                | Self::NodeNotFound { .. }
                | Self::WorkflowNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_discriminator() {
        assert!(Error::TypeNotFound {
            type_name: "tosca.nodes.Compute".into()
        }
        .is_not_found());
        assert!(!Error::InvalidEnumValue {
            kind: "instance state",
            value: "bogus".into()
        }
        .is_not_found());
    }

    #[test]
    fn capability_type_error_names_both_sides() {
        let err = Error::MissingCapabilityType {
            type_name: "custom.nodes.App".into(),
            capability: "endpoint".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("custom.nodes.App"));
        assert!(msg.contains("endpoint"));
    }
}
