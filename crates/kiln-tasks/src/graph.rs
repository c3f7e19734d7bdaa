//! Dynamic directed acyclic graph with free-node extraction

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A directed acyclic graph that is consumed as it is executed.
///
/// Every node maps to its set of prerequisites. A node is *free* once that
/// set is empty; removing a node strips it from every other node's
/// prerequisites. Iteration follows the ordering of `T`, so the same input
/// always yields the same sequence of free nodes.
#[derive(Debug, Clone)]
pub struct DynamicGraph<T> {
    prerequisites: BTreeMap<T, BTreeSet<T>>,
}

impl<T: Ord + Clone + fmt::Display> DynamicGraph<T> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            prerequisites: BTreeMap::new(),
        }
    }

    /// Insert a node; inserting an existing node is a no-op
    pub fn add_node(&mut self, node: T) {
        self.prerequisites.entry(node).or_default();
    }

    /// Record that `from` depends on `to`.
    ///
    /// Both nodes are inserted if missing. The edge is rejected if it would
    /// close a cycle.
    pub fn add_edge(&mut self, from: T, to: T) -> Result<(), CycleError> {
        if from == to {
            return Err(CycleError::new(vec![from.clone(), to]));
        }
        if let Some(path) = self.path(&to, &from) {
            // path runs to -> ... -> from; the new edge closes it
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(from);
            cycle.extend(path);
            return Err(CycleError::new(cycle));
        }

        self.add_node(to.clone());
        self.prerequisites.entry(from).or_default().insert(to);
        Ok(())
    }

    /// Nodes whose prerequisites have all been removed, in stable order
    pub fn free_nodes(&self) -> Vec<T> {
        self.prerequisites
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Remove a node and release everything waiting on it
    pub fn remove_node(&mut self, node: &T) {
        self.prerequisites.remove(node);
        for deps in self.prerequisites.values_mut() {
            deps.remove(node);
        }
    }

    /// Whether no nodes remain
    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }

    /// Number of remaining nodes
    pub fn len(&self) -> usize {
        self.prerequisites.len()
    }

    /// Whether the node is present
    pub fn contains(&self, node: &T) -> bool {
        self.prerequisites.contains_key(node)
    }

    /// All remaining nodes, in stable order
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.prerequisites.keys()
    }

    /// Unresolved prerequisites of a node
    pub fn prerequisites(&self, node: &T) -> Option<&BTreeSet<T>> {
        self.prerequisites.get(node)
    }

    /// Check the whole structure is acyclic, reporting one cycle if not
    pub fn validate(&self) -> Result<(), CycleError> {
        let mut state: BTreeMap<&T, Visit> = BTreeMap::new();
        for node in self.prerequisites.keys() {
            let mut stack = Vec::new();
            if let Some(cycle) = self.find_cycle(node, &mut state, &mut stack) {
                return Err(CycleError::new(cycle));
            }
        }
        Ok(())
    }

    /// Extract every batch without executing anything.
    ///
    /// Consumes a copy of the graph one batch at a time, the same way the
    /// executor does. Fails if a non-empty graph has no free nodes.
    pub fn drain_batches(&self) -> Result<Vec<Vec<T>>, CycleError> {
        let mut graph = self.clone();
        let mut batches = Vec::new();
        while !graph.is_empty() {
            let free = graph.free_nodes();
            if free.is_empty() {
                return Err(match graph.validate() {
                    Err(e) => e,
                    Ok(()) => CycleError::new(graph.nodes().cloned().collect()),
                });
            }
            for node in &free {
                graph.remove_node(node);
            }
            batches.push(free);
        }
        Ok(batches)
    }

    /// Path from `start` to `target` following prerequisite edges
    fn path(&self, start: &T, target: &T) -> Option<Vec<T>> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![(start.clone(), vec![start.clone()])];
        while let Some((node, path)) = stack.pop() {
            if &node == target {
                return Some(path);
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(deps) = self.prerequisites.get(&node) {
                for dep in deps.iter().rev() {
                    if !visited.contains(dep) {
                        let mut next = path.clone();
                        next.push(dep.clone());
                        stack.push((dep.clone(), next));
                    }
                }
            }
        }
        None
    }

    fn find_cycle<'a>(
        &'a self,
        node: &'a T,
        state: &mut BTreeMap<&'a T, Visit>,
        stack: &mut Vec<&'a T>,
    ) -> Option<Vec<T>> {
        match state.get(node) {
            Some(Visit::Done) => return None,
            Some(Visit::InProgress) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<T> = stack[start..].iter().map(|n| (*n).clone()).collect();
                cycle.push(node.clone());
                return Some(cycle);
            }
            None => {}
        }

        state.insert(node, Visit::InProgress);
        stack.push(node);
        if let Some(deps) = self.prerequisites.get(node) {
            for dep in deps {
                if let Some(cycle) = self.find_cycle(dep, state, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        state.insert(node, Visit::Done);
        None
    }
}

impl<T: Ord + Clone + fmt::Display> Default for DynamicGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// A set of edges that would make the graph cyclic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cyclic task graph: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// Node names along the cycle, first and last equal
    pub cycle: Vec<String>,
}

impl CycleError {
    fn new<T: fmt::Display>(nodes: Vec<T>) -> Self {
        Self {
            cycle: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }
}
