//! Arena representation of a workflow DAG.
//!
//! Join steps are shared: a step listed as `next` by several predecessors
//! occupies a single slot referenced by index, so join semantics need no
//! re-reading and no ownership cycles. Each slot counts its incoming
//! `next` edges (`ref_count`); slots with zero incoming edges are the
//! workflow's roots.

use std::collections::HashMap;

use maestro_deployments::Activity;

use crate::error::{Error, Result};

/// Index of a step slot in the arena.
pub type StepIndex = usize;

/// One step slot.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name (unique within the workflow).
    pub name: String,
    /// The node the step targets, when any.
    pub node: Option<String>,
    /// The step's activities, executed in order.
    pub activities: Vec<Activity>,
    /// Successors on success.
    pub next: Vec<StepIndex>,
    /// Successors on failure.
    pub on_failure: Vec<StepIndex>,
    /// Number of incoming `next` edges.
    pub ref_count: usize,
    /// Number of incoming `on-failure` edges.
    pub failure_ref_count: usize,
}

impl Step {
    /// Returns true if the step has no successors.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next.is_empty()
    }
}

/// An executable workflow plan.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// The workflow's name.
    pub workflow_name: String,
    steps: Vec<Step>,
    index: HashMap<String, StepIndex>,
}

impl WorkflowGraph {
    /// Creates an empty graph for the named workflow.
    #[must_use]
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            steps: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a step slot with unresolved edges; returns its index.
    ///
    /// Adding a name twice returns the existing slot.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        node: Option<String>,
        activities: Vec<Activity>,
    ) -> StepIndex {
        let name = name.into();
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let idx = self.steps.len();
        self.steps.push(Step {
            name: name.clone(),
            node,
            activities,
            next: Vec::new(),
            on_failure: Vec::new(),
            ref_count: 0,
            failure_ref_count: 0,
        });
        self.index.insert(name, idx);
        idx
    }

    /// Adds a success edge, bumping the target's ref count.
    pub fn add_next_edge(&mut self, from: StepIndex, to: StepIndex) {
        self.steps[from].next.push(to);
        self.steps[to].ref_count += 1;
    }

    /// Adds a failure edge. Failure edges never contribute to join counts
    /// (they are alternatives, not joins) but a step reachable only
    /// through them is not a root either.
    pub fn add_on_failure_edge(&mut self, from: StepIndex, to: StepIndex) {
        self.steps[from].on_failure.push(to);
        self.steps[to].failure_ref_count += 1;
    }

    /// Returns the slot at an index.
    #[must_use]
    pub fn step(&self, idx: StepIndex) -> &Step {
        &self.steps[idx]
    }

    /// Returns all slots.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step_index(&self, name: &str) -> Option<StepIndex> {
        self.index.get(name).copied()
    }

    /// Returns the roots: slots with no incoming edge of either kind, in
    /// insertion order.
    #[must_use]
    pub fn roots(&self) -> Vec<StepIndex> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.ref_count == 0 && step.failure_ref_count == 0)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Validates that `next` edges form a DAG.
    ///
    /// Uses iterative depth-first traversal with grey/black colouring so a
    /// back edge is reported with the step it re-enters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] naming a step on the cycle.
    pub fn validate_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        let mut colours = vec![Colour::White; self.steps.len()];
        for start in 0..self.steps.len() {
            if colours[start] != Colour::White {
                continue;
            }
            // Stack of (step, next-child cursor).
            let mut stack: Vec<(StepIndex, usize)> = vec![(start, 0)];
            colours[start] = Colour::Grey;
            while let Some(&(idx, cursor)) = stack.last() {
                if cursor < self.steps[idx].next.len() {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    let child = self.steps[idx].next[cursor];
                    match colours[child] {
                        Colour::Grey => {
                            return Err(Error::CycleDetected {
                                workflow_name: self.workflow_name.clone(),
                                step_name: self.steps[child].name.clone(),
                            });
                        }
                        Colour::White => {
                            colours[child] = Colour::Grey;
                            stack.push((child, 0));
                        }
                        Colour::Black => {}
                    }
                } else {
                    colours[idx] = Colour::Black;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}
