//! sa-pipeline: staged workflow generation and execution
//!
//! Turns a natural-language request into an executed geoprocessing
//! workflow. Stages run strictly in sequence for one request:
//!
//! - `decomposer`: task naming, data overview, operation breakdown
//! - `selector`: candidate narrowing and per-operation tool choice
//! - `synthesizer`: deterministic script generation from the graph
//! - `review`: optional critique before the first execution
//! - `sandbox`: isolated subprocess execution per attempt
//! - `debug`: bounded execute/repair state machine
//! - `pipeline`: the `Orchestrator` tying it together

mod backend;
pub mod data;
pub mod debug;
pub mod decomposer;
pub mod diagnostics;
pub mod hints;
pub mod parsing;
pub mod pipeline;
pub mod prompts;
pub mod review;
pub mod sandbox;
pub mod selector;
pub mod synthesizer;

#[cfg(test)]
mod testing;

// Re-export main types
pub use data::{DataCollaborator, DatasetHandle, ManifestCollaborator};
pub use debug::{DebugLoop, DebugOutcome};
pub use decomposer::TaskDecomposer;
pub use hints::{ErrorFamily, Hint};
pub use pipeline::{Orchestrator, RunResult};
pub use prompts::RepairBrief;
pub use review::ScriptReviewer;
pub use sandbox::{ExecutionContext, ExecutionSandbox, ProcessSandbox, RunWorkspace};
pub use selector::ToolSelector;
pub use synthesizer::CodeSynthesizer;
