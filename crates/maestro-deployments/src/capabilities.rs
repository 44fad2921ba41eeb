//! Capability property and attribute resolution.
//!
//! The lookup chains here implement the TOSCA resolution rules:
//!
//! For a capability **property**:
//! 1. node-level capability assignment
//! 2. node-type capability property, walking the node-type hierarchy
//! 3. capability-type default, walking the capability-type hierarchy
//! 4. transitively via `HostedOn` to the hosting node
//! 5. declared-but-optional properties resolve to an empty string
//!
//! For an instance capability **attribute**: instance-scoped assignment,
//! node-level assignment, capability-type default, `HostedOn` recursion and
//! finally property reflection ("properties reflect as attributes").
//!
//! Defaults that carry TOSCA function expressions are re-evaluated in the
//! caller's node/instance context before being returned.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use maestro_core::{DeploymentId, KvStore};

use crate::error::{Error, Result};
use crate::nodes;
use crate::paths;
use crate::types;
use crate::values::{self, FunctionArg, FunctionCall};

type BoxedResolve<'a> = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

/// Retrieves the value of a property on a node capability.
///
/// Returns `None` only when the property is not found anywhere and is not
/// declared optional; a declared-but-optional absent property resolves to
/// `Some("")` for backward compatibility.
///
/// # Errors
///
/// Returns type and storage errors from the hierarchy walks.
pub async fn get_capability_property(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    capability_name: &str,
    property_name: &str,
    nested_keys: &[String],
) -> Result<Option<String>> {
    get_capability_property_inner(
        store,
        deployment_id,
        node_name.to_string(),
        capability_name,
        property_name,
        nested_keys,
    )
    .await
}

fn get_capability_property_inner<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    node_name: String,
    capability_name: &'a str,
    property_name: &'a str,
    nested_keys: &'a [String],
) -> BoxedResolve<'a> {
    Box::pin(async move {
        let capability_type =
            nodes::get_node_capability_type(store, deployment_id, &node_name, capability_name)
                .await?;

        let mut prop_data_type = None;
        let mut has_prop = false;
        if let Some(cap_type) = &capability_type {
            has_prop =
                types::type_has_property(store, deployment_id, cap_type, property_name, true)
                    .await?;
            if has_prop {
                prop_data_type =
                    types::get_type_property_data_type(store, deployment_id, cap_type, property_name)
                        .await?;
            }
        }

        // 1. Node-level capability assignment.
        let assignment_base = format!(
            "{}capabilities/{capability_name}/properties/{property_name}",
            paths::node_prefix(deployment_id, &node_name)
        );
        if let Some(value) = values::read_assignment(
            store,
            deployment_id,
            &assignment_base,
            prop_data_type.as_deref(),
            nested_keys,
        )
        .await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        // 2. Node-type capability property, walking the node-type hierarchy.
        let node_type = nodes::get_node_type(store, deployment_id, &node_name).await?;
        let mut current = Some(node_type);
        while let Some(t) = current {
            let base = format!(
                "{}capabilities/{capability_name}/properties/{property_name}",
                paths::type_prefix(deployment_id, &t)
            );
            if let Some(value) = values::read_assignment(
                store,
                deployment_id,
                &base,
                prop_data_type.as_deref(),
                nested_keys,
            )
            .await?
            {
                return Ok(Some(values::value_to_string(&value)));
            }
            current = types::get_parent_type(store, deployment_id, &t).await?;
        }

        // 3. Capability-type default, walking the capability-type hierarchy.
        if let Some(cap_type) = &capability_type {
            if let Some((value, is_function)) = types::get_type_default_property(
                store,
                deployment_id,
                cap_type,
                property_name,
                nested_keys,
            )
            .await?
            {
                if !is_function {
                    return Ok(Some(values::value_to_string(&value)));
                }
                let call = FunctionCall::parse(&values::value_to_string(&value))?;
                let ctx = FunctionContext {
                    node_name: &node_name,
                    instance_id: None,
                };
                return Ok(Some(
                    evaluate_function(store, deployment_id, &ctx, &call).await?,
                ));
            }
        }

        // 4. Transitively via HostedOn.
        if let Some(host) = nodes::get_hosted_on_node(store, deployment_id, &node_name).await? {
            // The hosting chain is acyclic by construction of the topology;
            // this recursion terminates at a root compute.
            let found = get_capability_property_inner(
                store,
                deployment_id,
                host,
                capability_name,
                property_name,
                nested_keys,
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        // 5. Declared-but-optional properties resolve to "".
        if has_prop {
            if let Some(cap_type) = &capability_type {
                let required =
                    types::is_type_property_required(store, deployment_id, cap_type, property_name)
                        .await?;
                if !required {
                    return Ok(Some(String::new()));
                }
            }
        }

        Ok(None)
    })
}

/// Retrieves the value of an attribute on a node-instance capability.
///
/// Resolution order: instance-scoped assignment, node-level assignment,
/// capability-type default, `HostedOn` recursion, then property reflection
/// via [`get_capability_property`].
///
/// # Errors
///
/// Returns type and storage errors from the hierarchy walks.
pub async fn get_instance_capability_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    capability_name: &str,
    attribute_name: &str,
    nested_keys: &[String],
) -> Result<Option<String>> {
    get_instance_capability_attribute_inner(
        store,
        deployment_id,
        node_name.to_string(),
        instance_id,
        capability_name,
        attribute_name,
        nested_keys,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
fn get_instance_capability_attribute_inner<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    node_name: String,
    instance_id: &'a str,
    capability_name: &'a str,
    attribute_name: &'a str,
    nested_keys: &'a [String],
) -> BoxedResolve<'a> {
    Box::pin(async move {
        let capability_type =
            nodes::get_node_capability_type(store, deployment_id, &node_name, capability_name)
                .await?;

        let mut attr_data_type = None;
        if let Some(cap_type) = &capability_type {
            if types::type_has_attribute(store, deployment_id, cap_type, attribute_name, true)
                .await?
            {
                attr_data_type =
                    types::get_type_attribute_data_type(store, deployment_id, cap_type, attribute_name)
                        .await?;
            }
        }

        // 1. Instance-scoped assignment.
        let instance_base = format!(
            "{}capabilities/{capability_name}/attributes/{attribute_name}",
            paths::instance_prefix(deployment_id, &node_name, instance_id)
        );
        if let Some(value) = values::read_assignment(
            store,
            deployment_id,
            &instance_base,
            attr_data_type.as_deref(),
            nested_keys,
        )
        .await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        // 2. Node-level assignment.
        let node_base = format!(
            "{}capabilities/{capability_name}/attributes/{attribute_name}",
            paths::node_prefix(deployment_id, &node_name)
        );
        if let Some(value) = values::read_assignment(
            store,
            deployment_id,
            &node_base,
            attr_data_type.as_deref(),
            nested_keys,
        )
        .await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        // 3. Capability-type default.
        if let Some(cap_type) = &capability_type {
            if let Some((value, is_function)) = types::get_type_default_attribute(
                store,
                deployment_id,
                cap_type,
                attribute_name,
                nested_keys,
            )
            .await?
            {
                if !is_function {
                    return Ok(Some(values::value_to_string(&value)));
                }
                let call = FunctionCall::parse(&values::value_to_string(&value))?;
                let ctx = FunctionContext {
                    node_name: &node_name,
                    instance_id: Some(instance_id),
                };
                return Ok(Some(
                    evaluate_function(store, deployment_id, &ctx, &call).await?,
                ));
            }
        }

        // 4. Transitively via HostedOn.
        if let Some(host) = nodes::get_hosted_on_node(store, deployment_id, &node_name).await? {
            let found = get_instance_capability_attribute_inner(
                store,
                deployment_id,
                host,
                instance_id,
                capability_name,
                attribute_name,
                nested_keys,
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        // 5. Properties reflect as attributes.
        get_capability_property_inner(
            store,
            deployment_id,
            node_name,
            capability_name,
            attribute_name,
            nested_keys,
        )
        .await
    })
}

/// Writes a capability attribute on a single node instance.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn set_instance_capability_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    capability_name: &str,
    attribute_name: &str,
    value: &str,
) -> Result<()> {
    let key = format!(
        "{}capabilities/{capability_name}/attributes/{attribute_name}",
        paths::instance_prefix(deployment_id, node_name, instance_id)
    );
    store.set(&key, Bytes::from(value.to_string())).await?;
    Ok(())
}

/// Retrieves a node property: node assignment, then type-hierarchy default,
/// then `HostedOn` recursion.
///
/// # Errors
///
/// Returns [`Error::MissingRequiredProperty`] for a declared required
/// property with no value and no default anywhere in the hierarchy.
pub async fn get_node_property(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    property_name: &str,
    nested_keys: &[String],
) -> Result<Option<String>> {
    get_node_property_inner(
        store,
        deployment_id,
        node_name.to_string(),
        property_name,
        nested_keys,
    )
    .await
}

fn get_node_property_inner<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    node_name: String,
    property_name: &'a str,
    nested_keys: &'a [String],
) -> BoxedResolve<'a> {
    Box::pin(async move {
        let node_type = nodes::get_node_type(store, deployment_id, &node_name).await?;
        let declared =
            types::type_has_property(store, deployment_id, &node_type, property_name, true).await?;
        let data_type = if declared {
            types::get_type_property_data_type(store, deployment_id, &node_type, property_name)
                .await?
        } else {
            None
        };

        let base = format!(
            "{}properties/{property_name}",
            paths::node_prefix(deployment_id, &node_name)
        );
        if let Some(value) =
            values::read_assignment(store, deployment_id, &base, data_type.as_deref(), nested_keys)
                .await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        if let Some((value, is_function)) = types::get_type_default_property(
            store,
            deployment_id,
            &node_type,
            property_name,
            nested_keys,
        )
        .await?
        {
            if !is_function {
                return Ok(Some(values::value_to_string(&value)));
            }
            let call = FunctionCall::parse(&values::value_to_string(&value))?;
            let ctx = FunctionContext {
                node_name: &node_name,
                instance_id: None,
            };
            return Ok(Some(
                evaluate_function(store, deployment_id, &ctx, &call).await?,
            ));
        }

        if let Some(host) = nodes::get_hosted_on_node(store, deployment_id, &node_name).await? {
            let found = get_node_property_inner(
                store,
                deployment_id,
                host,
                property_name,
                nested_keys,
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if declared
            && types::is_type_property_required(store, deployment_id, &node_type, property_name)
                .await?
        {
            return Err(Error::MissingRequiredProperty {
                property: property_name.to_string(),
                context: format!("node {node_name}"),
            });
        }
        Ok(None)
    })
}

/// Retrieves a node-instance attribute: instance assignment, node
/// assignment, type default, `HostedOn` recursion, then property
/// reflection.
///
/// # Errors
///
/// Returns type and storage errors from the hierarchy walks.
pub async fn get_instance_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    attribute_name: &str,
    nested_keys: &[String],
) -> Result<Option<String>> {
    get_instance_attribute_inner(
        store,
        deployment_id,
        node_name.to_string(),
        instance_id,
        attribute_name,
        nested_keys,
    )
    .await
}

fn get_instance_attribute_inner<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    node_name: String,
    instance_id: &'a str,
    attribute_name: &'a str,
    nested_keys: &'a [String],
) -> BoxedResolve<'a> {
    Box::pin(async move {
        let instance_base = format!(
            "{}attributes/{attribute_name}",
            paths::instance_prefix(deployment_id, &node_name, instance_id)
        );
        if let Some(value) =
            values::read_assignment(store, deployment_id, &instance_base, None, nested_keys).await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        let node_base = format!(
            "{}attributes/{attribute_name}",
            paths::node_prefix(deployment_id, &node_name)
        );
        if let Some(value) =
            values::read_assignment(store, deployment_id, &node_base, None, nested_keys).await?
        {
            return Ok(Some(values::value_to_string(&value)));
        }

        let node_type = nodes::get_node_type(store, deployment_id, &node_name).await?;
        if let Some((value, is_function)) = types::get_type_default_attribute(
            store,
            deployment_id,
            &node_type,
            attribute_name,
            nested_keys,
        )
        .await?
        {
            if !is_function {
                return Ok(Some(values::value_to_string(&value)));
            }
            let call = FunctionCall::parse(&values::value_to_string(&value))?;
            let ctx = FunctionContext {
                node_name: &node_name,
                instance_id: Some(instance_id),
            };
            return Ok(Some(
                evaluate_function(store, deployment_id, &ctx, &call).await?,
            ));
        }

        if let Some(host) = nodes::get_hosted_on_node(store, deployment_id, &node_name).await? {
            let found = get_instance_attribute_inner(
                store,
                deployment_id,
                host,
                instance_id,
                attribute_name,
                nested_keys,
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        // Properties reflect as attributes.
        match get_node_property(store, deployment_id, &node_name, attribute_name, nested_keys).await
        {
            Ok(found) => Ok(found),
            Err(Error::MissingRequiredProperty { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    })
}

/// Context for TOSCA function evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext<'a> {
    /// The node the expression is evaluated against (`SELF`).
    pub node_name: &'a str,
    /// The instance, for attribute lookups.
    pub instance_id: Option<&'a str>,
}

/// Evaluates a parsed TOSCA function in the given context.
///
/// Supports `get_property: [SELF|HOST, <name>, ...nested]`,
/// `get_attribute: [SELF|HOST, <name>, ...nested]` and `concat` over
/// literals and nested calls. Unresolvable lookups evaluate to the empty
/// string.
///
/// # Errors
///
/// Returns [`Error::InvalidFunction`] on unsupported targets or malformed
/// operand lists.
pub fn evaluate_function<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    ctx: &'a FunctionContext<'a>,
    call: &'a FunctionCall,
) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
    Box::pin(async move {
        match call.name.as_str() {
            "concat" => {
                let mut out = String::new();
                for arg in &call.args {
                    match arg {
                        FunctionArg::Literal(s) => out.push_str(s),
                        FunctionArg::Call(nested) => {
                            out.push_str(
                                &evaluate_function(store, deployment_id, ctx, nested).await?,
                            );
                        }
                    }
                }
                Ok(out)
            }
            "get_property" | "get_attribute" => {
                let args = call.literal_args()?;
                let (target, rest) = args.split_first().ok_or_else(|| Error::InvalidFunction {
                    message: format!("{} needs a target operand", call.name),
                })?;
                let node = match *target {
                    "SELF" => ctx.node_name.to_string(),
                    "HOST" => nodes::get_hosted_on_node(store, deployment_id, ctx.node_name)
                        .await?
                        .unwrap_or_else(|| ctx.node_name.to_string()),
                    other => {
                        return Err(Error::InvalidFunction {
                            message: format!("unsupported function target {other:?}"),
                        })
                    }
                };
                let (name, nested) = rest.split_first().ok_or_else(|| Error::InvalidFunction {
                    message: format!("{} needs a property/attribute name", call.name),
                })?;
                let nested: Vec<String> = nested.iter().map(ToString::to_string).collect();

                let resolved = if call.name == "get_property" {
                    get_node_property(store, deployment_id, &node, name, &nested).await?
                } else {
                    let instance = ctx.instance_id.unwrap_or("0");
                    get_instance_attribute(store, deployment_id, &node, instance, name, &nested)
                        .await?
                };
                Ok(resolved.unwrap_or_default())
            }
            other => Err(Error::InvalidFunction {
                message: format!("unknown function {other:?}"),
            }),
        }
    })
}
