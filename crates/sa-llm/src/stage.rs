//! Pipeline stages that call a reasoning backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed stage enumeration used for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Naming,
    Decomposition,
    DataOverview,
    ToolSelection,
    WorkflowGraph,
    CodeGeneration,
    Debugging,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Naming,
        Stage::Decomposition,
        Stage::DataOverview,
        Stage::ToolSelection,
        Stage::WorkflowGraph,
        Stage::CodeGeneration,
        Stage::Debugging,
    ];

    /// Stages that stay on a high-reasoning backend when one is selected
    pub fn needs_deep_reasoning(&self) -> bool {
        matches!(
            self,
            Stage::Decomposition | Stage::CodeGeneration | Stage::Debugging
        )
    }

    /// Completion token budget
    pub fn token_budget(&self) -> u32 {
        match self {
            Stage::Naming => 64,
            Stage::DataOverview => 1024,
            Stage::ToolSelection => 2048,
            Stage::WorkflowGraph => 2048,
            Stage::Decomposition => 4096,
            Stage::CodeGeneration | Stage::Debugging => 8192,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Naming => "naming",
            Stage::Decomposition => "decomposition",
            Stage::DataOverview => "data_overview",
            Stage::ToolSelection => "tool_selection",
            Stage::WorkflowGraph => "workflow_graph",
            Stage::CodeGeneration => "code_generation",
            Stage::Debugging => "debugging",
        };
        write!(f, "{}", name)
    }
}
