//! Dependency ordering for provisioning steps.
//!
//! Implements topological sort with cycle detection, using iterative DFS with
//! state tracking to avoid stack overflow on deep graphs. Roots are visited in
//! declaration order and prerequisites in the order they are listed, so the
//! resulting order is deterministic: independent steps run in the order they
//! were declared.

use super::error::GraphError;
use super::step::StepSpec;
use std::collections::{HashMap, HashSet};

/// Node state for DFS traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Not yet visited
    Unprocessed,
    /// Currently on the DFS path
    Processing,
    /// Emitted into the order
    Processed,
}

/// Steps plus a validated execution order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Steps in declaration order
    steps: Vec<StepSpec>,
    /// Map from step id to its index in `steps`
    index: HashMap<String, usize>,
    /// Prerequisite indices per step
    edges: Vec<Vec<usize>>,
    /// Execution order as indices into `steps`
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Validate `specs` and compute their execution order.
    ///
    /// Fails on duplicate or malformed steps, on references to undeclared
    /// prerequisites, and on cycles.
    pub fn build(specs: Vec<StepSpec>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if index.insert(spec.id().to_string(), i).is_some() {
                return Err(GraphError::DuplicateStep(spec.id().to_string()));
            }
        }

        let mut edges = Vec::with_capacity(specs.len());
        for spec in &specs {
            let mut deps = Vec::with_capacity(spec.prerequisites().len());
            for req in spec.prerequisites() {
                let Some(&dep) = index.get(req) else {
                    return Err(GraphError::UnknownPrerequisite {
                        step: spec.id().to_string(),
                        missing: req.clone(),
                    });
                };
                deps.push(dep);
            }
            edges.push(deps);
        }

        let mut graph = Self {
            steps: specs,
            index,
            edges,
            order: Vec::new(),
        };
        graph.order = graph.topological_order()?;
        Ok(graph)
    }

    /// Post-order DFS over every step, roots in declaration order.
    fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let mut state = vec![NodeState::Unprocessed; self.steps.len()];
        let mut order = Vec::with_capacity(self.steps.len());

        for root in 0..self.steps.len() {
            if state[root] == NodeState::Unprocessed {
                self.dfs_visit(root, &mut state, &mut order)?;
            }
        }

        Ok(order)
    }

    /// Iterative DFS with explicit stack to avoid recursion limits.
    ///
    /// The stack always holds the current path from `start`, which is what
    /// gets reported when a back edge closes a cycle.
    fn dfs_visit(
        &self,
        start: usize,
        state: &mut [NodeState],
        order: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        // (node, index of next prerequisite to visit)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        state[start] = NodeState::Processing;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let deps = &self.edges[node];

            if top.1 >= deps.len() {
                state[node] = NodeState::Processed;
                order.push(node);
                stack.pop();
                continue;
            }

            let dep = deps[top.1];
            top.1 += 1;

            match state[dep] {
                NodeState::Processed => {}
                NodeState::Unprocessed => {
                    state[dep] = NodeState::Processing;
                    stack.push((dep, 0));
                }
                NodeState::Processing => {
                    let pos = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[pos..]
                        .iter()
                        .map(|&(n, _)| self.steps[n].id().to_string())
                        .collect();
                    cycle.push(self.steps[dep].id().to_string());
                    return Err(GraphError::Cycle { cycle });
                }
            }
        }

        Ok(())
    }

    /// Steps in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &StepSpec> {
        self.order.iter().map(|&i| &self.steps[i])
    }

    /// Steps in declaration order.
    pub fn declared(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn get(&self, id: &str) -> Option<&StepSpec> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step that depends on `id`, directly or transitively, in
    /// execution order.
    pub fn dependents_of(&self, id: &str) -> Vec<&StepSpec> {
        let Some(&root) = self.index.get(id) else {
            return Vec::new();
        };

        let mut tainted: HashSet<usize> = HashSet::from([root]);
        let mut result = Vec::new();
        // Prerequisites always precede dependents in `order`, so one pass is enough.
        for &i in &self.order {
            if i != root && self.edges[i].iter().any(|d| tainted.contains(d)) {
                tainted.insert(i);
                result.push(&self.steps[i]);
            }
        }
        result
    }
}
