//! sa-workflows: workflow graphs for spatial analysis tasks
//!
//! Features:
//! - Graph assembly from tool bindings with deterministic node ids
//! - Kind validation on every edge
//! - JSON and Graphviz export

pub mod builder;
pub mod export;
pub mod graph;
pub mod node;

pub use builder::{GraphBuild, GraphBuilder};
pub use graph::{DatasetRef, GraphEdge, TerminalOutput, WorkflowGraph};
pub use node::{GraphNode, InputBinding, NodeInput, NodeOutput};
