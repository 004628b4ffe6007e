//! Workflow graph model
//!
//! Nodes are stored in topological order. Edges carry the kind produced by
//! their source; validation checks every edge against the kind its
//! destination port expects.

use sa_core::{DataKind, EdgeViolation, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::node::{GraphNode, NodeInput, NodeOutput};

/// A dataset referenced by the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub kind: DataKind,
}

/// A data dependency between two ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id, or `dataset:<name>`
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
    /// Kind produced by the source
    pub kind: DataKind,
}

/// A terminal output saved by the synthesized script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalOutput {
    pub node_id: String,
    pub output: NodeOutput,
}

/// Validated workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub task_name: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub datasets: Vec<DatasetRef>,
}

impl WorkflowGraph {
    /// Assemble a graph, deriving edges from node inputs
    pub fn new(task_name: &str, nodes: Vec<GraphNode>, datasets: Vec<DatasetRef>) -> Self {
        let produced: HashMap<(String, String), DataKind> = nodes
            .iter()
            .flat_map(|n| {
                n.outputs
                    .iter()
                    .map(move |o| ((n.id.clone(), o.port.clone()), o.kind))
            })
            .chain(
                datasets
                    .iter()
                    .map(|d| ((format!("dataset:{}", d.name), "data".to_string()), d.kind)),
            )
            .collect();

        let edges = nodes
            .iter()
            .flat_map(|n| {
                let produced = &produced;
                n.inputs.iter().map(move |(port, binding)| {
                    let from = binding.source.source_id();
                    let from_port = binding.source.source_port().to_string();
                    let kind = produced
                        .get(&(from.clone(), from_port.clone()))
                        .copied()
                        .unwrap_or(DataKind::Any);
                    GraphEdge {
                        from,
                        from_port,
                        to: n.id.clone(),
                        to_port: port.clone(),
                        kind,
                    }
                })
            })
            .collect();

        Self {
            task_name: task_name.to_string(),
            nodes,
            edges,
            datasets,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Outputs not consumed by any edge, in node order
    pub fn terminal_outputs(&self) -> Vec<TerminalOutput> {
        let consumed: HashSet<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.from_port.as_str()))
            .collect();
        self.nodes
            .iter()
            .flat_map(|n| {
                n.outputs
                    .iter()
                    .filter(|o| !consumed.contains(&(n.id.as_str(), o.port.as_str())))
                    .map(|o| TerminalOutput {
                        node_id: n.id.clone(),
                        output: o.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Node ids each node points to, in node order
    pub fn adjacency(&self) -> Vec<(String, Vec<String>)> {
        self.nodes
            .iter()
            .map(|n| {
                let mut next: Vec<String> = Vec::new();
                for edge in self.edges.iter().filter(|e| e.from == n.id) {
                    if !next.contains(&edge.to) {
                        next.push(edge.to.clone());
                    }
                }
                (n.id.clone(), next)
            })
            .collect()
    }

    /// Check structure and data kinds
    ///
    /// Nodes must have unique ids and may only read from datasets of the
    /// graph or from nodes listed before them. Every edge's produced kind
    /// must be accepted by its destination port.
    pub fn validate(&self) -> Result<()> {
        let datasets: HashSet<&str> = self.datasets.iter().map(|d| d.name.as_str()).collect();
        let mut earlier: HashMap<&str, &GraphNode> = HashMap::new();

        for node in &self.nodes {
            if earlier.contains_key(node.id.as_str()) {
                return Err(Error::InvalidGraph(format!("duplicate node id {}", node.id)));
            }
            for (port, binding) in &node.inputs {
                match &binding.source {
                    NodeInput::Dataset { name } => {
                        if !datasets.contains(name.as_str()) {
                            return Err(Error::InvalidGraph(format!(
                                "input {}.{} reads unknown dataset '{}'",
                                node.id, port, name
                            )));
                        }
                    }
                    NodeInput::Node { node: upstream, output } => {
                        let source = earlier.get(upstream.as_str()).ok_or_else(|| {
                            Error::InvalidGraph(format!(
                                "input {}.{} reads {} which is not an earlier node",
                                node.id, port, upstream
                            ))
                        })?;
                        if source.output(output).is_none() {
                            return Err(Error::InvalidGraph(format!(
                                "input {}.{} reads missing output {}.{}",
                                node.id, port, upstream, output
                            )));
                        }
                    }
                }
            }
            earlier.insert(node.id.as_str(), node);
        }

        for edge in &self.edges {
            let expected = self
                .node(&edge.to)
                .and_then(|n| n.input(&edge.to_port))
                .map(|b| b.expected)
                .ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "edge targets unknown port {}.{}",
                        edge.to, edge.to_port
                    ))
                })?;
            if !expected.accepts(edge.kind) {
                return Err(Error::GraphValidation(EdgeViolation {
                    from: edge.from.clone(),
                    from_port: edge.from_port.clone(),
                    to: edge.to.clone(),
                    to_port: edge.to_port.clone(),
                    produced: edge.kind,
                    expected,
                }));
            }
        }
        Ok(())
    }
}
