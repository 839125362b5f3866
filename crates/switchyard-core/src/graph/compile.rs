//! Graph compilation: structural validation + fixed traversal order.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use super::document::{NodeSpec, WorkflowDocument};

/// One structural problem in a workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphViolation {
    #[error("node #{0} has no id")]
    MissingNodeId(usize),

    #[error("duplicate node id `{0}`")]
    DuplicateNodeId(String),

    #[error("node `{0}` has no type")]
    MissingNodeType(String),

    #[error("node `{from}` points to unknown node `{to}`")]
    UnknownNextTarget { from: String, to: String },

    #[error("duplicate edge `{from}` -> `{to}`")]
    DuplicateEdge { from: String, to: String },

    #[error("graph contains a cycle")]
    Cycle,

    #[error("graph has no entry node")]
    NoEntryNode,

    #[error("node `{node}` uses unregistered step type `{step_type}`")]
    UnknownStepType { node: String, step_type: String },

    #[error("node `{node}` has invalid config: {reason}")]
    InvalidConfig { node: String, reason: String },
}

/// A validated workflow graph. Immutable once built.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    graph: DiGraph<NodeSpec, ()>,
    order: Vec<NodeIndex>,
}

impl CompiledGraph {
    /// Validates `doc` and fixes the traversal order.
    ///
    /// Every violation found is reported; nothing is compiled unless the list
    /// is empty. An empty document compiles to an empty graph.
    pub fn compile(doc: &WorkflowDocument) -> Result<Self, Vec<GraphViolation>> {
        let mut violations = Vec::new();
        let mut graph = DiGraph::new();
        let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
        // First occurrence of each id; duplicates own no edges.
        let mut placed: Vec<(NodeIndex, &NodeSpec)> = Vec::new();

        for (position, node) in doc.nodes.iter().enumerate() {
            if node.id.is_empty() {
                violations.push(GraphViolation::MissingNodeId(position));
                continue;
            }
            if index_of.contains_key(node.id.as_str()) {
                violations.push(GraphViolation::DuplicateNodeId(node.id.clone()));
                continue;
            }
            if node.node_type.is_empty() {
                violations.push(GraphViolation::MissingNodeType(node.id.clone()));
            }
            let idx = graph.add_node(node.clone());
            index_of.insert(node.id.as_str(), idx);
            placed.push((idx, node));
        }

        let mut seen_edges = HashSet::new();
        for &(from, node) in &placed {
            for target in &node.next {
                let Some(&to) = index_of.get(target.as_str()) else {
                    violations.push(GraphViolation::UnknownNextTarget {
                        from: node.id.clone(),
                        to: target.clone(),
                    });
                    continue;
                };
                if !seen_edges.insert((from, to)) {
                    violations.push(GraphViolation::DuplicateEdge {
                        from: node.id.clone(),
                        to: target.clone(),
                    });
                    continue;
                }
                graph.add_edge(from, to, ());
            }
        }

        if graph.node_count() > 0
            && !graph
                .node_indices()
                .any(|idx| graph.neighbors_directed(idx, Direction::Incoming).next().is_none())
        {
            violations.push(GraphViolation::NoEntryNode);
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => {
                violations.push(GraphViolation::Cycle);
                Vec::new()
            }
        };

        if violations.is_empty() {
            Ok(Self { graph, order })
        } else {
            Err(violations)
        }
    }

    /// Nodes in traversal order. Every node appears after all of its predecessors.
    pub fn steps(&self) -> impl Iterator<Item = &NodeSpec> + '_ {
        self.order.iter().map(|&idx| &self.graph[idx])
    }

    /// Nodes without incoming edges, in traversal order.
    pub fn entry_nodes(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|&&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|&idx| self.graph[idx].id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
