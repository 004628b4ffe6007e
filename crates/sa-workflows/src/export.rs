//! Visualization export
//!
//! Writes `<task>.graph.json` (nodes, edge list and adjacency) and
//! `<task>.dot` (Graphviz) for a workflow graph.

use sa_core::Result;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::graph::WorkflowGraph;

/// JSON edge-list plus adjacency rendering
pub fn to_json(graph: &WorkflowGraph) -> Value {
    let adjacency: serde_json::Map<String, Value> = graph
        .adjacency()
        .into_iter()
        .map(|(id, next)| (id, json!(next)))
        .collect();

    json!({
        "task": graph.task_name,
        "datasets": graph.datasets,
        "nodes": graph.nodes.iter().map(|n| json!({
            "id": n.id,
            "operation": n.operation_id,
            "label": n.label,
            "tool": n.tool,
            "parameters": n.parameters,
            "outputs": n.outputs,
        })).collect::<Vec<_>>(),
        "edges": graph.edges,
        "adjacency": adjacency,
    })
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz DOT rendering
pub fn to_dot(graph: &WorkflowGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(&graph.task_name));
    let _ = writeln!(out, "  rankdir=LR;");
    for dataset in &graph.datasets {
        let _ = writeln!(
            out,
            "  \"dataset:{}\" [shape=cylinder, label=\"{}\\n({})\"];",
            escape(&dataset.name),
            escape(&dataset.name),
            dataset.kind
        );
    }
    for node in &graph.nodes {
        let _ = writeln!(
            out,
            "  \"{}\" [shape=box, label=\"{}\\n{}\"];",
            node.id,
            escape(&node.label),
            escape(&node.tool)
        );
    }
    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            escape(&edge.from),
            edge.to,
            edge.kind
        );
    }
    out.push_str("}\n");
    out
}

/// Write both renderings into `dir`, returning the written paths
pub fn write_exports(graph: &WorkflowGraph, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let json_path = dir.join(format!("{}.graph.json", graph.task_name));
    let dot_path = dir.join(format!("{}.dot", graph.task_name));
    std::fs::write(&json_path, serde_json::to_string_pretty(&to_json(graph))?)?;
    std::fs::write(&dot_path, to_dot(graph))?;
    info!(path = %json_path.display(), "Exported workflow graph");
    Ok(vec![json_path, dot_path])
}
