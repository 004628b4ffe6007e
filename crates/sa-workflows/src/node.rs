//! Workflow Node - one bound tool invocation
//!
//! Each node corresponds to exactly one Operation and carries:
//! - A deterministic id `n{op}_{tool-slug}` used as the variable namespace
//! - Resolved parameter values
//! - Input bindings to a dataset or an upstream node output
//! - Output variables written by the synthesized code

use sa_core::task::slugify;
use sa_core::{DataKind, OperationCategory, OperationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Source of a node input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NodeInput {
    /// Dataset from the request's data context
    Dataset { name: String },
    /// Output port of an earlier node
    Node { node: String, output: String },
}

impl NodeInput {
    /// Edge source label, `dataset:<name>` or the node id
    pub fn source_id(&self) -> String {
        match self {
            NodeInput::Dataset { name } => format!("dataset:{}", name),
            NodeInput::Node { node, .. } => node.clone(),
        }
    }

    pub fn source_port(&self) -> &str {
        match self {
            NodeInput::Dataset { .. } => "data",
            NodeInput::Node { output, .. } => output,
        }
    }
}

/// A bound input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub source: NodeInput,
    /// Kind the port expects
    pub expected: DataKind,
}

/// An output port and the script variable holding its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub port: String,
    pub kind: DataKind,
    pub variable: String,
}

/// Node of a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub operation_id: OperationId,
    pub label: String,
    pub category: OperationCategory,
    /// Catalog tool name, e.g. `native:buffer`
    pub tool: String,
    pub parameters: BTreeMap<String, Value>,
    /// Input bindings keyed by port name, in declaration order of the tool
    pub inputs: Vec<(String, InputBinding)>,
    pub outputs: Vec<NodeOutput>,
}

impl GraphNode {
    /// Deterministic node id
    pub fn make_id(operation_id: OperationId, tool_slug: &str) -> String {
        format!("n{}_{}", operation_id, tool_slug)
    }

    /// Script variable for an output port of this node
    pub fn output_variable(node_id: &str, port: &str) -> String {
        format!("{}_{}", node_id, slugify(port, 32))
    }

    pub fn output(&self, port: &str) -> Option<&NodeOutput> {
        self.outputs.iter().find(|o| o.port == port)
    }

    pub fn input(&self, port: &str) -> Option<&InputBinding> {
        self.inputs.iter().find(|(p, _)| p == port).map(|(_, b)| b)
    }

    /// Ids of upstream nodes this node reads from
    pub fn upstream_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for (_, binding) in &self.inputs {
            if let NodeInput::Node { node, .. } = &binding.source {
                if !ids.contains(&node.as_str()) {
                    ids.push(node.as_str());
                }
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_variables() {
        let id = GraphNode::make_id(3, "native_buffer");
        assert_eq!(id, "n3_native_buffer");
        assert_eq!(GraphNode::output_variable(&id, "OUTPUT"), "n3_native_buffer_output");
    }

    #[test]
    fn test_input_source_labels() {
        let ds = NodeInput::Dataset { name: "points".into() };
        assert_eq!(ds.source_id(), "dataset:points");
        assert_eq!(ds.source_port(), "data");
        let up = NodeInput::Node { node: "n1_native_buffer".into(), output: "OUTPUT".into() };
        assert_eq!(up.source_id(), "n1_native_buffer");
        assert_eq!(up.source_port(), "OUTPUT");
    }
}
