//! Operation input resolution.
//!
//! For each input declared on an interface operation, the resolver emits
//! one [`EnvInput`] per concerned instance:
//!
//! - a **property definition** input takes the task-level value when one
//!   was submitted, else the definition's default
//! - a **value assignment** input is evaluated in each instance's context
//!   (TOSCA functions included), for source instances and, on relationship
//!   operations, target instances too
//!
//! Alongside the flat env list the resolver returns the deduplicated,
//! ordered list of variable names, sanitised for shell use. That ordering
//! is part of the executor contract.

use std::fmt;

use maestro_core::{DeploymentId, KvStore, TaskId};
use maestro_deployments::capabilities::{evaluate_function, FunctionContext};
use maestro_deployments::types;
use maestro_deployments::values::{self, FunctionCall};
use maestro_tasks::TaskRegistry;

use crate::context::Operation;
use crate::error::Result;

/// One environment input handed to an operation executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInput {
    /// Input name as declared on the operation.
    pub name: String,
    /// Resolved value.
    pub value: String,
    /// Qualified instance name (`<node>_<instanceID>`).
    pub instance_name: String,
}

impl fmt::Display for EnvInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EnvInput: [name: {:?}, value: {:?}, instance: {:?}]",
            self.name, self.value, self.instance_name
        )
    }
}

/// Returns the qualified instance name used in executor environments.
#[must_use]
pub fn instance_qualified_name(node_name: &str, instance_id: &str) -> String {
    format!("{node_name}_{instance_id}")
}

/// Sanitises an input name for use as a shell variable: anything that is
/// not alphanumeric or underscore becomes `_`, and a leading digit gets an
/// underscore prefix.
#[must_use]
pub fn sanitize_for_shell(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Resolves the inputs of an operation for every concerned instance.
///
/// `target_node` names the relationship target for relationship
/// operations; its instances receive inputs too.
///
/// # Errors
///
/// Returns resolution errors from the data model or the task registry.
pub async fn resolve_inputs(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    task_id: &TaskId,
    tasks: &TaskRegistry,
    operation: &Operation,
    target_node: Option<&str>,
) -> Result<(Vec<EnvInput>, Vec<String>)> {
    let source_instances = tasks.get_instances(task_id, deployment_id, node_name).await?;
    let target_instances = match target_node {
        Some(target) => tasks.get_instances(task_id, deployment_id, target).await?,
        None => Vec::new(),
    };

    let mut env_inputs: Vec<EnvInput> = Vec::new();
    let mut var_input_names: Vec<String> = Vec::new();
    let mut push_var = |name: &str, vars: &mut Vec<String>| {
        let sanitized = sanitize_for_shell(name);
        if !vars.contains(&sanitized) {
            vars.push(sanitized);
        }
    };

    let input_keys = types::get_operation_inputs(
        store,
        deployment_id,
        &operation.implemented_in_type,
        &operation.name,
    )
    .await?;

    for input in &input_keys {
        let is_property_definition = types::is_operation_input_property_definition(
            store,
            deployment_id,
            &operation.implemented_in_type,
            &operation.name,
            input,
        )
        .await?;

        if is_property_definition {
            let value = match tasks.get_task_input(task_id, input).await {
                Ok(value) => value,
                Err(err) if err.is_task_data_not_found() => types::get_operation_input_expression(
                    store,
                    deployment_id,
                    &operation.implemented_in_type,
                    &operation.name,
                    input,
                    "default",
                )
                .await?
                .unwrap_or_default(),
                Err(err) => return Err(err.into()),
            };
            for instance in &source_instances {
                env_inputs.push(EnvInput {
                    name: input.clone(),
                    value: value.clone(),
                    instance_name: instance_qualified_name(node_name, instance),
                });
            }
            if !source_instances.is_empty() {
                push_var(input, &mut var_input_names);
            }
            continue;
        }

        let expression = types::get_operation_input_expression(
            store,
            deployment_id,
            &operation.implemented_in_type,
            &operation.name,
            input,
            "value",
        )
        .await?
        .unwrap_or_default();

        let mut emitted = false;
        for instance in &source_instances {
            let value =
                evaluate_expression(store, deployment_id, node_name, instance, &expression).await?;
            env_inputs.push(EnvInput {
                name: input.clone(),
                value,
                instance_name: instance_qualified_name(node_name, instance),
            });
            emitted = true;
        }
        if let Some(target) = target_node {
            for instance in &target_instances {
                let value =
                    evaluate_expression(store, deployment_id, target, instance, &expression)
                        .await?;
                env_inputs.push(EnvInput {
                    name: input.clone(),
                    value,
                    instance_name: instance_qualified_name(target, instance),
                });
                emitted = true;
            }
        }
        if emitted {
            push_var(input, &mut var_input_names);
        }
    }

    tracing::debug!(
        task_id = %task_id,
        node = node_name,
        operation = %operation.name,
        inputs = env_inputs.len(),
        "resolved operation inputs"
    );
    Ok((env_inputs, var_input_names))
}

async fn evaluate_expression(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    node_name: &str,
    instance_id: &str,
    expression: &str,
) -> Result<String> {
    if values::is_function_expression(expression) {
        let call = FunctionCall::parse(expression).map_err(maestro_deployments::Error::from)?;
        let ctx = FunctionContext {
            node_name,
            instance_id: Some(instance_id),
        };
        Ok(evaluate_function(store, deployment_id, &ctx, &call)
            .await
            .map_err(maestro_deployments::Error::from)?)
    } else {
        Ok(expression.to_string())
    }
}
