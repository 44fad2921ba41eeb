//! Complex-value storage, reassembly and TOSCA function expressions.
//!
//! Values in the store are raw strings, one key per scalar leaf. A complex
//! property is a subtree: objects become nested keys, lists become numeric
//! segments. Reassembly turns such a subtree back into JSON, consulting the
//! declared data type of each nested path so numbers and booleans survive
//! the string round trip.
//!
//! TOSCA function expressions (`get_property`, `get_attribute`, `concat`)
//! are stored in their single-line YAML form, e.g.
//! `get_attribute: [SELF, ip_address]`. This module parses them; evaluation
//! lives in [`crate::capabilities`], which has the resolution context.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use maestro_core::{DeploymentId, KvStore, Transaction};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types;

/// Flattens a JSON value into `(key, scalar)` pairs rooted at `base`.
///
/// Scalars map to `base` itself; objects recurse into `base/<field>`;
/// arrays into `base/<index>`.
pub fn flatten_value(base: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_value(&format!("{base}/{k}"), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_value(&format!("{base}/{i}"), v, out);
            }
        }
        Value::String(s) => out.push((base.to_string(), s.clone())),
        Value::Null => out.push((base.to_string(), String::new())),
        other => out.push((base.to_string(), other.to_string())),
    }
}

/// Stores a possibly-complex value as a subtree rooted at `base`.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn store_complex_value(store: &dyn KvStore, base: &str, value: &Value) -> Result<()> {
    let mut pairs = Vec::new();
    flatten_value(base, value, &mut pairs);
    let mut txn = Transaction::new();
    for (key, scalar) in pairs {
        txn.set(key, scalar);
    }
    txn.commit_batched(store).await?;
    Ok(())
}

/// Renders a resolved value to its wire string form.
///
/// Strings pass through unquoted; everything else is compact JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads a value assignment rooted at `base`, optionally descending
/// `nested_keys`, and types the result according to `data_type`.
///
/// Returns `None` when neither the exact key nor any subtree exists.
///
/// # Errors
///
/// Returns a storage error from the store.
pub async fn read_assignment(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    base: &str,
    data_type: Option<&str>,
    nested_keys: &[String],
) -> Result<Option<Value>> {
    let mut path = base.to_string();
    for key in nested_keys {
        path.push('/');
        path.push_str(key);
    }

    let Some(raw) = read_raw_tree(store, &path).await? else {
        return Ok(None);
    };

    let effective_type = match data_type {
        Some(dt) if !nested_keys.is_empty() => {
            types::get_nested_data_type(store, deployment_id, dt, nested_keys).await?
        }
        Some(dt) => Some(dt.to_string()),
        None => None,
    };

    let typed = apply_data_type(store, deployment_id, raw, effective_type).await?;
    Ok(Some(typed))
}

/// Reads the raw subtree at `path` as untyped JSON (all leaves strings).
async fn read_raw_tree(store: &dyn KvStore, path: &str) -> Result<Option<Value>> {
    if let Some(leaf) = store.get_string(path).await? {
        return Ok(Some(Value::String(leaf)));
    }

    let prefix = format!("{path}/");
    let pairs = store.list(&prefix).await?;
    if pairs.is_empty() {
        return Ok(None);
    }

    let mut tree: BTreeMap<Vec<String>, String> = BTreeMap::new();
    for pair in pairs {
        let rel = pair.key[prefix.len()..]
            .split('/')
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let value = String::from_utf8(pair.value.to_vec())
            .map_err(|e| maestro_core::Error::serialization(format!("key {}: {e}", pair.key)))?;
        tree.insert(rel, value);
    }
    Ok(Some(assemble(&tree)))
}

/// Assembles a relative-path -> leaf map into nested JSON.
fn assemble(tree: &BTreeMap<Vec<String>, String>) -> Value {
    // Group leaves by their first segment.
    let mut groups: BTreeMap<String, BTreeMap<Vec<String>, String>> = BTreeMap::new();
    for (segments, value) in tree {
        match segments.split_first() {
            Some((head, rest)) if rest.is_empty() => {
                groups
                    .entry(head.clone())
                    .or_default()
                    .insert(Vec::new(), value.clone());
            }
            Some((head, rest)) => {
                groups
                    .entry(head.clone())
                    .or_default()
                    .insert(rest.to_vec(), value.clone());
            }
            None => return Value::String(value.clone()),
        }
    }

    let all_numeric = !groups.is_empty() && groups.keys().all(|k| k.parse::<usize>().is_ok());
    if all_numeric {
        let mut indexed: Vec<(usize, Value)> = groups
            .into_iter()
            .map(|(k, sub)| {
                let idx = k.parse::<usize>().unwrap_or(usize::MAX);
                (idx, subtree_value(&sub))
            })
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        Value::Array(indexed.into_iter().map(|(_, v)| v).collect())
    } else {
        let mut map = Map::new();
        for (k, sub) in groups {
            map.insert(k, subtree_value(&sub));
        }
        Value::Object(map)
    }
}

fn subtree_value(sub: &BTreeMap<Vec<String>, String>) -> Value {
    if sub.len() == 1 {
        if let Some(value) = sub.get(&Vec::new()) {
            return Value::String(value.clone());
        }
    }
    assemble(sub)
}

/// Applies a declared data type to an untyped (all-strings) value tree.
///
/// Primitive leaves convert to JSON numbers/booleans; object fields follow
/// the data type's property definitions; list entries keep the entry schema
/// element type.
fn apply_data_type<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    value: Value,
    data_type: Option<String>,
) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
    Box::pin(async move {
        match value {
            Value::String(s) => Ok(type_scalar(&s, data_type.as_deref())),
            Value::Array(items) => {
                let mut typed = Vec::with_capacity(items.len());
                for item in items {
                    typed.push(apply_data_type(store, deployment_id, item, data_type.clone()).await?);
                }
                Ok(Value::Array(typed))
            }
            Value::Object(map) => {
                let mut typed = Map::new();
                for (k, v) in map {
                    let field_type = match &data_type {
                        Some(dt) if !is_primitive_type(dt) => {
                            types::get_type_property_data_type(store, deployment_id, dt, &k).await?
                        }
                        _ => None,
                    };
                    typed.insert(k, apply_data_type(store, deployment_id, v, field_type).await?);
                }
                Ok(Value::Object(typed))
            }
            other => Ok(other),
        }
    })
}

fn is_primitive_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "string" | "integer" | "int" | "float" | "double" | "boolean" | "bool" | "list" | "map"
    )
}

fn type_scalar(raw: &str, data_type: Option<&str>) -> Value {
    match data_type {
        Some("integer" | "int") => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some("float" | "double") => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Some("boolean" | "bool") => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}

/// A parsed TOSCA function expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Function name: `get_property`, `get_attribute` or `concat`.
    pub name: String,
    /// Function operands, possibly nested calls.
    pub args: Vec<FunctionArg>,
}

/// One operand of a function expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionArg {
    /// A literal string operand.
    Literal(String),
    /// A nested function call (only valid inside `concat`).
    Call(FunctionCall),
}

const FUNCTION_NAMES: [&str; 3] = ["get_property", "get_attribute", "concat"];

/// Returns true if the string looks like a TOSCA function expression.
#[must_use]
pub fn is_function_expression(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    FUNCTION_NAMES.iter().any(|name| {
        trimmed
            .strip_prefix(name)
            .is_some_and(|rest| rest.trim_start().starts_with(':'))
    })
}

/// Returns true if a resolved value is a string carrying a function
/// expression.
#[must_use]
pub fn is_function_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if is_function_expression(s))
}

impl FunctionCall {
    /// Parses a single-line TOSCA function expression, e.g.
    /// `get_attribute: [SELF, endpoint, ip_address]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFunction`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (name, rest) = trimmed.split_once(':').ok_or_else(|| Error::InvalidFunction {
            message: format!("expected '<name>: [...]', got {trimmed:?}"),
        })?;
        let name = name.trim();
        if !FUNCTION_NAMES.contains(&name) {
            return Err(Error::InvalidFunction {
                message: format!("unknown function {name:?}"),
            });
        }
        let rest = rest.trim();
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| Error::InvalidFunction {
                message: format!("expected bracketed operand list, got {rest:?}"),
            })?;

        let mut args = Vec::new();
        for part in split_top_level(inner) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if is_function_expression(part) {
                args.push(FunctionArg::Call(Self::parse(part)?));
            } else {
                args.push(FunctionArg::Literal(unquote(part).to_string()));
            }
        }
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }

    /// Returns the literal operands, erroring on nested calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFunction`] when an operand is a nested call.
    pub fn literal_args(&self) -> Result<Vec<&str>> {
        self.args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Literal(s) => Ok(s.as_str()),
                FunctionArg::Call(_) => Err(Error::InvalidFunction {
                    message: format!("{} does not accept nested calls", self.name),
                }),
            })
            .collect()
    }
}

/// Splits a comma-separated operand list, respecting nested brackets and
/// quotes.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut current = String::new();
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '[' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ']' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use maestro_core::MemoryKvStore;

    fn dep() -> DeploymentId {
        DeploymentId::new("dep-1").unwrap()
    }

    #[test]
    fn flatten_scalar_object_and_list() {
        let value = serde_json::json!({
            "host": "10.0.0.1",
            "ports": [80, 443],
            "tls": {"enabled": true}
        });
        let mut pairs = Vec::new();
        flatten_value("base", &value, &mut pairs);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("base/host".to_string(), "10.0.0.1".to_string()),
                ("base/ports/0".to_string(), "80".to_string()),
                ("base/ports/1".to_string(), "443".to_string()),
                ("base/tls/enabled".to_string(), "true".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn roundtrip_complex_value() {
        let store = MemoryKvStore::new();
        let value = serde_json::json!({
            "host": "10.0.0.1",
            "ports": ["80", "443"]
        });
        store_complex_value(&store, "props/endpoint", &value)
            .await
            .unwrap();

        let read = read_assignment(&store, &dep(), "props/endpoint", None, &[])
            .await
            .unwrap()
            .expect("present");
        assert_eq!(read, value);
    }

    #[tokio::test]
    async fn nested_keys_select_a_sub_path() {
        let store = MemoryKvStore::new();
        store
            .set("props/endpoint/tls/enabled", Bytes::from("true"))
            .await
            .unwrap();

        let read = read_assignment(
            &store,
            &dep(),
            "props/endpoint",
            None,
            &["tls".to_string(), "enabled".to_string()],
        )
        .await
        .unwrap()
        .expect("present");
        assert_eq!(read, Value::String("true".to_string()));
    }

    #[tokio::test]
    async fn declared_data_type_preserves_json_typing() {
        let store = MemoryKvStore::new();
        store.set("props/port", Bytes::from("8080")).await.unwrap();
        store.set("props/secure", Bytes::from("true")).await.unwrap();

        let port = read_assignment(&store, &dep(), "props/port", Some("integer"), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(port, Value::Number(8080.into()));

        let secure = read_assignment(&store, &dep(), "props/secure", Some("boolean"), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secure, Value::Bool(true));
    }

    #[tokio::test]
    async fn missing_value_reads_as_none() {
        let store = MemoryKvStore::new();
        let read = read_assignment(&store, &dep(), "props/ghost", None, &[])
            .await
            .unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn value_to_string_passes_strings_through() {
        assert_eq!(value_to_string(&Value::String("abc".into())), "abc");
        assert_eq!(value_to_string(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(value_to_string(&Value::Number(80.into())), "80");
    }

    #[test]
    fn function_detection() {
        assert!(is_function_expression("get_attribute: [SELF, ip_address]"));
        assert!(is_function_expression("concat: [\"http://\", get_attribute: [SELF, ip]]"));
        assert!(!is_function_expression("plain value"));
        assert!(!is_function_expression("get_attribute_name"));
    }

    #[test]
    fn parse_simple_call() {
        let call = FunctionCall::parse("get_attribute: [SELF, endpoint, ip_address]").unwrap();
        assert_eq!(call.name, "get_attribute");
        assert_eq!(
            call.literal_args().unwrap(),
            vec!["SELF", "endpoint", "ip_address"]
        );
    }

    #[test]
    fn parse_nested_concat() {
        let call =
            FunctionCall::parse("concat: [\"http://\", get_attribute: [SELF, ip], \":\", get_property: [SELF, port]]")
                .unwrap();
        assert_eq!(call.name, "concat");
        assert_eq!(call.args.len(), 4);
        assert!(matches!(call.args[0], FunctionArg::Literal(ref s) if s == "http://"));
        assert!(matches!(call.args[1], FunctionArg::Call(ref c) if c.name == "get_attribute"));
    }

    #[test]
    fn parse_rejects_unknown_function() {
        assert!(FunctionCall::parse("get_secret: [vault, key]").is_err());
        assert!(FunctionCall::parse("not a function").is_err());
    }
}
