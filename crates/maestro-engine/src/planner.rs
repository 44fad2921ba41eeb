//! Workflow planning: from stored definitions to an executable arena.
//!
//! Planning reads a named workflow from the deployment, expands `inline`
//! steps by splicing the inlined workflow's steps into the graph, then
//! materialises an arena with resolved indices, reference-counted joins and
//! validated structure (known steps, resolvable nodes, no cycles).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use maestro_core::{DeploymentId, KvStore};
use maestro_deployments::workflows::{self, StepDefinition};
use maestro_deployments::{nodes, Activity};

use crate::error::{Error, Result};
use crate::graph::WorkflowGraph;

/// Reads a workflow and produces an executable plan.
///
/// # Errors
///
/// Returns definition errors from the store reads, expansion errors for
/// recursive inlining, [`Error::UnknownStep`] for dangling edges,
/// a node error when a step targets an unknown node, and
/// [`Error::CycleDetected`] when `next` edges loop.
pub async fn read_workflow(
    store: &dyn KvStore,
    deployment_id: &DeploymentId,
    workflow_name: &str,
) -> Result<WorkflowGraph> {
    let mut chain = Vec::new();
    let definitions = load_expanded(store, deployment_id, workflow_name, &mut chain).await?;

    let mut graph = WorkflowGraph::new(workflow_name);
    for (name, definition) in &definitions {
        graph.add_step(name, definition.node.clone(), definition.activities.clone());
    }
    for (name, definition) in &definitions {
        let from = graph
            .step_index(name)
            .unwrap_or_else(|| unreachable!("step {name} was just inserted"));
        for next in &definition.next {
            let to = graph.step_index(next).ok_or_else(|| Error::UnknownStep {
                workflow_name: workflow_name.to_string(),
                step_name: name.clone(),
                next_step: next.clone(),
            })?;
            graph.add_next_edge(from, to);
        }
        for failure in &definition.on_failure {
            let to = graph.step_index(failure).ok_or_else(|| Error::UnknownStep {
                workflow_name: workflow_name.to_string(),
                step_name: name.clone(),
                next_step: failure.clone(),
            })?;
            graph.add_on_failure_edge(from, to);
        }
    }

    // Every targeted node must resolve in the topology.
    for step in graph.steps() {
        if let Some(node) = &step.node {
            if !nodes::node_exists(store, deployment_id, node).await? {
                return Err(Error::Deployments(
                    maestro_deployments::Error::NodeNotFound {
                        node_name: node.clone(),
                    },
                ));
            }
        }
    }

    graph.validate_acyclic()?;
    Ok(graph)
}

/// Loads a workflow's steps with `inline` activities spliced in.
fn load_expanded<'a>(
    store: &'a dyn KvStore,
    deployment_id: &'a DeploymentId,
    workflow_name: &'a str,
    chain: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StepDefinition>>> + Send + 'a>> {
    Box::pin(async move {
        if chain.iter().any(|w| w == workflow_name) {
            return Err(Error::RecursiveInline {
                workflow_name: workflow_name.to_string(),
                step_name: chain.last().cloned().unwrap_or_default(),
            });
        }
        chain.push(workflow_name.to_string());

        let definition = workflows::get_workflow(store, deployment_id, workflow_name).await?;
        let mut steps: BTreeMap<String, StepDefinition> = definition.steps;

        loop {
            let Some((inline_step, inlined_workflow)) = find_inline_step(&steps) else {
                break;
            };
            let sub = load_expanded(store, deployment_id, &inlined_workflow, chain).await?;
            splice_inline(&mut steps, &inline_step, &sub);
        }

        chain.pop();
        Ok(steps)
    })
}

/// Returns the first step that is a pure inline expansion point.
fn find_inline_step(steps: &BTreeMap<String, StepDefinition>) -> Option<(String, String)> {
    steps.iter().find_map(|(name, definition)| {
        if let [Activity::Inline(workflow)] = definition.activities.as_slice() {
            Some((name.clone(), workflow.clone()))
        } else {
            None
        }
    })
}

/// Splices an inlined workflow's steps in place of `inline_step`.
///
/// The inlined steps are renamed `<inline_step>/<name>`. Predecessors of
/// the inline step are rewired to the inlined roots, inlined terminals
/// inherit the inline step's successors, and every inlined step inherits
/// its failure edges.
fn splice_inline(
    steps: &mut BTreeMap<String, StepDefinition>,
    inline_step: &str,
    sub: &BTreeMap<String, StepDefinition>,
) {
    let Some(removed) = steps.remove(inline_step) else {
        return;
    };

    let rename = |name: &str| format!("{inline_step}/{name}");

    let mut has_incoming: BTreeMap<&str, bool> = sub.keys().map(|k| (k.as_str(), false)).collect();
    for definition in sub.values() {
        for next in &definition.next {
            if let Some(flag) = has_incoming.get_mut(next.as_str()) {
                *flag = true;
            }
        }
    }
    let roots: Vec<String> = sub
        .keys()
        .filter(|name| !has_incoming.get(name.as_str()).copied().unwrap_or(false))
        .map(|name| rename(name))
        .collect();

    for (name, definition) in sub {
        let mut spliced = definition.clone();
        spliced.next = spliced.next.iter().map(|n| rename(n)).collect();
        spliced.on_failure = spliced.on_failure.iter().map(|n| rename(n)).collect();
        if definition.next.is_empty() {
            spliced.next.extend(removed.next.iter().cloned());
        }
        spliced.on_failure.extend(removed.on_failure.iter().cloned());
        steps.insert(rename(name), spliced);
    }

    for definition in steps.values_mut() {
        if definition.next.iter().any(|n| n == inline_step) {
            definition.next.retain(|n| n != inline_step);
            definition.next.extend(roots.iter().cloned());
        }
        if definition.on_failure.iter().any(|n| n == inline_step) {
            definition.on_failure.retain(|n| n != inline_step);
            definition.on_failure.extend(roots.iter().cloned());
        }
    }
}
