//! The TOSCA type graph.
//!
//! Types form a single-inheritance hierarchy through `derived_from`.
//! Capability types and data types live in the same tree as node types, so
//! every hierarchy walk below works for all three.
//!
//! Stored layout per type:
//!
//! ```text
//! types/<name>/name
//! types/<name>/derived_from
//! types/<name>/properties/<prop>/{type, required, default, entry_schema/type}
//! types/<name>/attributes/<attr>/{type, default}
//! types/<name>/capabilities/<cap>/type
//! types/<name>/interfaces/<iface>/<op>/implementation/{primary, type}
//! ```

use std::collections::HashSet;

use maestro_core::{DeploymentId, KvStore};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::paths;
use crate::values;

/// A capability definition surfaced by a type hierarchy walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDefinition {
    /// Definition name (e.g. `endpoint`).
    pub name: String,
    /// Capability type (e.g. `tosca.capabilities.Endpoint`).
    pub capability_type: String,
}

/// Returns true if the type is defined in the deployment.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn type_exists(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
) -> Result<bool> {
    let children = store
        .child_names(&paths::type_prefix(deployment_id, type_name))
        .await?;
    Ok(!children.is_empty())
}

async fn require_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
) -> Result<()> {
    if type_exists(store, deployment_id, type_name).await? {
        Ok(())
    } else {
        Err(Error::TypeNotFound {
            type_name: type_name.to_string(),
        })
    }
}

/// Returns the parent of a type, or `None` for a hierarchy root.
///
/// # Errors
///
/// Returns [`Error::TypeNotFound`] when the type itself is missing.
pub async fn get_parent_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
) -> Result<Option<String>> {
    require_type(store, deployment_id, type_name).await?;
    let key = format!("{}derived_from", paths::type_prefix(deployment_id, type_name));
    let parent = store.get_string(&key).await?;
    Ok(parent.filter(|p| !p.is_empty()))
}

/// Returns true if `sub_type` equals or derives (transitively) from
/// `ancestor_type`. Unrelated types return false; a missing type on the walk
/// is an error.
///
/// # Errors
///
/// Returns [`Error::TypeNotFound`] when a type on the walk is missing.
pub async fn is_type_derived_from(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    sub_type: &str,
    ancestor_type: &str,
) -> Result<bool> {
    let mut current = sub_type.to_string();
    let mut seen = HashSet::new();
    loop {
        if current == ancestor_type {
            return Ok(true);
        }
        if !seen.insert(current.clone()) {
            // derived_from cycle; treat as unrelated rather than spinning.
            return Ok(false);
        }
        match get_parent_type(store, deployment_id, &current).await? {
            Some(parent) => current = parent,
            None => return Ok(false),
        }
    }
}

/// Returns the capabilities across the type's hierarchy whose capability
/// type derives from `capability_type_name`, keyed by definition name
/// (child-most definition wins).
///
/// # Errors
///
/// Returns [`Error::MissingCapabilityType`] for a definition without a
/// `type` key, or [`Error::TypeNotFound`] on a broken hierarchy.
pub async fn get_capabilities_of_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    capability_type_name: &str,
) -> Result<Vec<CapabilityDefinition>> {
    let mut result: Vec<CapabilityDefinition> = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut current = Some(type_name.to_string());

    while let Some(t) = current {
        let caps_prefix = format!("{}capabilities/", paths::type_prefix(deployment_id, &t));
        for cap_name in store.child_names(&caps_prefix).await? {
            if seen_names.contains(&cap_name) {
                continue;
            }
            let type_key = format!("{caps_prefix}{cap_name}/type");
            let cap_type = store.get_string(&type_key).await?.filter(|v| !v.is_empty());
            let Some(cap_type) = cap_type else {
                return Err(Error::MissingCapabilityType {
                    type_name: t.clone(),
                    capability: cap_name,
                });
            };
            if is_type_derived_from(store, deployment_id, &cap_type, capability_type_name).await? {
                seen_names.insert(cap_name.clone());
                result.push(CapabilityDefinition {
                    name: cap_name,
                    capability_type: cap_type,
                });
            }
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(result)
}

/// Returns true if the type hierarchy carries at least one capability whose
/// type derives from `capability_type_name`.
///
/// # Errors
///
/// See [`get_capabilities_of_type`].
pub async fn type_has_capability(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    capability_type_name: &str,
) -> Result<bool> {
    Ok(
        !get_capabilities_of_type(store, deployment_id, type_name, capability_type_name)
            .await?
            .is_empty(),
    )
}

/// Returns the capability type of a named capability on a node type,
/// walking the hierarchy. Empty result means the capability is not defined
/// anywhere in the hierarchy.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_type_capability_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    capability_name: &str,
) -> Result<Option<String>> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let key = format!(
            "{}capabilities/{capability_name}/type",
            paths::type_prefix(deployment_id, &t)
        );
        if let Some(cap_type) = store.get_string(&key).await?.filter(|v| !v.is_empty()) {
            return Ok(Some(cap_type));
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Returns true if the type (or, with `explore_parents`, its hierarchy)
/// declares the property.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn type_has_property(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    property_name: &str,
    explore_parents: bool,
) -> Result<bool> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let prefix = format!(
            "{}properties/{property_name}/",
            paths::type_prefix(deployment_id, &t)
        );
        if !store.child_names(&prefix).await?.is_empty() {
            return Ok(true);
        }
        if !explore_parents {
            return Ok(false);
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(false)
}

/// Returns true if the type (or, with `explore_parents`, its hierarchy)
/// declares the attribute.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn type_has_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    attribute_name: &str,
    explore_parents: bool,
) -> Result<bool> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let prefix = format!(
            "{}attributes/{attribute_name}/",
            paths::type_prefix(deployment_id, &t)
        );
        if !store.child_names(&prefix).await?.is_empty() {
            return Ok(true);
        }
        if !explore_parents {
            return Ok(false);
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(false)
}

/// Returns whether a declared property is required.
///
/// TOSCA properties are required by default; the first definition found on
/// the hierarchy walk decides.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn is_type_property_required(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    property_name: &str,
) -> Result<bool> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let prefix = format!(
            "{}properties/{property_name}/",
            paths::type_prefix(deployment_id, &t)
        );
        if !store.child_names(&prefix).await?.is_empty() {
            let raw = store.get_string(&format!("{prefix}required")).await?;
            return Ok(match raw.as_deref() {
                Some("false") => false,
                // Absent or anything else: required, per TOSCA.
                _ => true,
            });
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(true)
}

/// Returns the declared data type of a property, walking the hierarchy.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_type_property_data_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    property_name: &str,
) -> Result<Option<String>> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let key = format!(
            "{}properties/{property_name}/type",
            paths::type_prefix(deployment_id, &t)
        );
        if let Some(dt) = store.get_string(&key).await?.filter(|v| !v.is_empty()) {
            return Ok(Some(dt));
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Returns the declared data type of an attribute, walking the hierarchy.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_type_attribute_data_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    attribute_name: &str,
) -> Result<Option<String>> {
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let key = format!(
            "{}attributes/{attribute_name}/type",
            paths::type_prefix(deployment_id, &t)
        );
        if let Some(dt) = store.get_string(&key).await?.filter(|v| !v.is_empty()) {
            return Ok(Some(dt));
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Returns the entry-schema type of a list/map data type, if declared.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_entry_schema_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    property_name: &str,
) -> Result<Option<String>> {
    let key = format!(
        "{}properties/{property_name}/entry_schema/type",
        paths::type_prefix(deployment_id, type_name)
    );
    Ok(store.get_string(&key).await?.filter(|v| !v.is_empty()))
}

/// Resolves the data type of a nested path inside a complex data type.
///
/// Numeric segments index into lists and keep the entry schema's element
/// type; named segments follow the data type's property definitions.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_nested_data_type(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    data_type: &str,
    nested_keys: &[String],
) -> Result<Option<String>> {
    let mut current = Some(data_type.to_string());
    for key in nested_keys {
        let Some(dt) = current else {
            return Ok(None);
        };
        if key.chars().all(|c| c.is_ascii_digit()) {
            // List index: stay on the element type when one is declared.
            current = Some(dt);
            continue;
        }
        current = get_type_property_data_type(store, deployment_id, &dt, key).await?;
    }
    Ok(current)
}

/// Reads a property default from the type hierarchy.
///
/// Returns `(value, is_function)`; function expressions are detected, not
/// evaluated, because evaluation needs the caller's node/instance context.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_type_default_property(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    property_name: &str,
    nested_keys: &[String],
) -> Result<Option<(Value, bool)>> {
    get_type_default(
        store,
        deployment_id,
        type_name,
        "properties",
        property_name,
        nested_keys,
    )
    .await
}

/// Reads an attribute default from the type hierarchy.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_type_default_attribute(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    attribute_name: &str,
    nested_keys: &[String],
) -> Result<Option<(Value, bool)>> {
    get_type_default(
        store,
        deployment_id,
        type_name,
        "attributes",
        attribute_name,
        nested_keys,
    )
    .await
}

async fn get_type_default(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    section: &str,
    name: &str,
    nested_keys: &[String],
) -> Result<Option<(Value, bool)>> {
    let data_type = if section == "attributes" {
        get_type_attribute_data_type(store, deployment_id, type_name, name).await?
    } else {
        get_type_property_data_type(store, deployment_id, type_name, name).await?
    };
    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let base = format!(
            "{}{section}/{name}/default",
            paths::type_prefix(deployment_id, &t)
        );
        if let Some(value) = values::read_assignment(
            store,
            deployment_id,
            &base,
            data_type.as_deref(),
            nested_keys,
        )
        .await?
        {
            let is_function = values::is_function_value(&value);
            return Ok(Some((value, is_function)));
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Returns the implementation artifact of an interface operation, walking
/// the hierarchy: `(primary, explicit kind)`.
///
/// The operation name may be qualified (`Standard.start`) or bare
/// (`start`, resolved against every interface).
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_operation_implementation(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    operation_name: &str,
) -> Result<Option<(String, Option<String>)>> {
    let (iface, op) = match operation_name.rsplit_once('.') {
        Some((iface, op)) => (Some(iface.to_string()), op.to_string()),
        None => (None, operation_name.to_string()),
    };

    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let ifaces_prefix = format!("{}interfaces/", paths::type_prefix(deployment_id, &t));
        let candidates: Vec<String> = match &iface {
            Some(name) => vec![name.clone()],
            None => store.child_names(&ifaces_prefix).await?,
        };
        for candidate in candidates {
            let impl_prefix = format!("{ifaces_prefix}{candidate}/{op}/implementation/");
            if let Some(primary) = store
                .get_string(&format!("{impl_prefix}primary"))
                .await?
                .filter(|v| !v.is_empty())
            {
                let kind = store
                    .get_string(&format!("{impl_prefix}type"))
                    .await?
                    .filter(|v| !v.is_empty());
                return Ok(Some((primary, kind)));
            }
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Lists the declared input names of an interface operation, walking the
/// hierarchy until the operation is found.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_operation_inputs(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    operation_name: &str,
) -> Result<Vec<String>> {
    let (iface, op) = match operation_name.rsplit_once('.') {
        Some((iface, op)) => (Some(iface.to_string()), op.to_string()),
        None => (None, operation_name.to_string()),
    };

    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let ifaces_prefix = format!("{}interfaces/", paths::type_prefix(deployment_id, &t));
        let candidates: Vec<String> = match &iface {
            Some(name) => vec![name.clone()],
            None => store.child_names(&ifaces_prefix).await?,
        };
        for candidate in candidates {
            let inputs_prefix = format!("{ifaces_prefix}{candidate}/{op}/inputs/");
            let names = store.child_names(&inputs_prefix).await?;
            if !names.is_empty() {
                return Ok(names);
            }
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(Vec::new())
}

/// Reads an operation input's `value` or `default` expression, walking the
/// hierarchy until the input is found.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn get_operation_input_expression(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    operation_name: &str,
    input_name: &str,
    field: &str,
) -> Result<Option<String>> {
    let (iface, op) = match operation_name.rsplit_once('.') {
        Some((iface, op)) => (Some(iface.to_string()), op.to_string()),
        None => (None, operation_name.to_string()),
    };

    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let ifaces_prefix = format!("{}interfaces/", paths::type_prefix(deployment_id, &t));
        let candidates: Vec<String> = match &iface {
            Some(name) => vec![name.clone()],
            None => store.child_names(&ifaces_prefix).await?,
        };
        for candidate in candidates {
            let key = format!("{ifaces_prefix}{candidate}/{op}/inputs/{input_name}/{field}");
            if let Some(raw) = store.get_string(&key).await? {
                return Ok(Some(raw));
            }
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(None)
}

/// Returns true if an operation input is declared as a property definition
/// (as opposed to a value assignment).
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn is_operation_input_property_definition(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    type_name: &str,
    operation_name: &str,
    input_name: &str,
) -> Result<bool> {
    let (iface, op) = match operation_name.rsplit_once('.') {
        Some((iface, op)) => (Some(iface.to_string()), op.to_string()),
        None => (None, operation_name.to_string()),
    };

    let mut current = Some(type_name.to_string());
    while let Some(t) = current {
        let ifaces_prefix = format!("{}interfaces/", paths::type_prefix(deployment_id, &t));
        let candidates: Vec<String> = match &iface {
            Some(name) => vec![name.clone()],
            None => store.child_names(&ifaces_prefix).await?,
        };
        for candidate in candidates {
            let key = format!("{ifaces_prefix}{candidate}/{op}/inputs/{input_name}/is_property_definition");
            if let Some(raw) = store.get_string(&key).await? {
                return Ok(raw == "true");
            }
        }
        current = get_parent_type(store, deployment_id, &t).await?;
    }
    Ok(false)
}
