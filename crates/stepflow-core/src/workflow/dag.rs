//! Dependency graph analysis: cycle detection, reachability and execution order.
//!
//! Uses `petgraph` to model step dependencies as a directed graph with an
//! edge from each dependency to its dependent. The validator works on the
//! lenient [`DependencyGraph`] (tolerates unknown and duplicate ids); the
//! executor uses [`execution_order`], which is strict and re-detects cycles
//! on its own.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsEvent, depth_first_search};
use stepflow_types::workflow::StepSpec;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// DagNode
// ---------------------------------------------------------------------------

/// Anything with an id and a list of dependency ids.
///
/// Implemented for typed steps and for the validator's view over raw
/// document steps, so both share the same graph code.
pub trait DagNode {
    fn node_id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

impl DagNode for StepSpec {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Lenient dependency graph used during validation.
///
/// The first occurrence of a duplicated id wins; dependencies on unknown ids
/// are dropped (they are reported separately).
pub struct DependencyGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> DependencyGraph<'a> {
    pub fn build<N: DagNode>(nodes: &'a [N]) -> Self {
        let mut graph = DiGraph::<&'a str, ()>::new();
        let mut index = HashMap::new();
        let mut owners = Vec::new();

        for node in nodes {
            let id = node.node_id();
            if !index.contains_key(id) {
                index.insert(id, graph.add_node(id));
                owners.push(node);
            }
        }

        for node in owners {
            let to = index[node.node_id()];
            for dep in node.dependencies() {
                if let Some(&from) = index.get(dep.as_str()) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph, index }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Every cycle found by a depth-first search, as the list of step ids on
    /// the recursion stack when the back edge was hit.
    ///
    /// Nodes are visited in document order, so the output is deterministic.
    pub fn find_cycles(&self) -> Vec<Vec<&'a str>> {
        let mut stack: Vec<NodeIndex> = Vec::new();
        let mut cycles = Vec::new();

        depth_first_search(&self.graph, self.graph.node_indices(), |event| match event {
            DfsEvent::Discover(n, _) => stack.push(n),
            DfsEvent::Finish(_, _) => {
                stack.pop();
            }
            DfsEvent::BackEdge(_, target) => {
                if let Some(pos) = stack.iter().position(|&n| n == target) {
                    cycles.push(stack[pos..].iter().map(|&n| self.graph[n]).collect());
                }
            }
            _ => {}
        });

        cycles
    }

    /// Ids reachable from `roots` by following edges from a step to the steps
    /// that depend on it. Roots are included.
    pub fn reachable_from(&self, roots: &[&str]) -> HashSet<&'a str> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = roots
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();

        while let Some(node) = queue.pop_front() {
            if !visited.insert(self.graph[node]) {
                continue;
            }
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if !visited.contains(self.graph[next]) {
                    queue.push_back(next);
                }
            }
        }

        visited
    }

    /// Ids that transitively depend on `id` (excluding `id` itself unless it
    /// sits on a cycle).
    pub fn descendants(&self, id: &str) -> HashSet<&'a str> {
        let Some(&start) = self.index.get(id) else {
            return HashSet::new();
        };
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .collect();

        while let Some(node) = queue.pop_front() {
            if visited.insert(self.graph[node]) {
                queue.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
            }
        }

        visited
    }
}

/// Render a cycle as `a -> b -> a`.
pub fn format_cycle(cycle: &[&str]) -> String {
    let mut parts: Vec<&str> = cycle.to_vec();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// Group steps into levels: every step in level `n` depends only on steps in
/// levels `< n`, and each level keeps document order.
///
/// 1. Build a `DiGraph` with `depends_on` edges.
/// 2. Run `petgraph::algo::toposort` to verify acyclicity.
/// 3. A step's level is one more than the deepest of its dependencies.
///
/// This is the same order a repeated "take every ready step in document
/// order" scan produces.
pub fn build_execution_plan(steps: &[StepSpec]) -> Result<Vec<Vec<&StepSpec>>, WorkflowError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let mut id_to_idx: HashMap<&str, usize> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        if id_to_idx.insert(step.id.as_str(), i).is_some() {
            return Err(WorkflowError::Definition(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for dep in &step.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        WorkflowError::CircularDependency(format!("cycle detected involving step '{node_id}'"))
    })?;

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &node_idx in &sorted {
        let step = &steps[node_idx.index()];
        let depth = step
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(step.id.as_str(), depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut levels: Vec<Vec<&StepSpec>> = vec![vec![]; max_depth + 1];
    for step in steps {
        levels[depths[step.id.as_str()]].push(step);
    }

    Ok(levels)
}

/// A valid, deterministic execution order for `steps`.
pub fn execution_order(steps: &[StepSpec]) -> Result<Vec<&StepSpec>, WorkflowError> {
    Ok(build_execution_plan(steps)?.into_iter().flatten().collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
