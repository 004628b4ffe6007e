//! Operation to tool bindings

use sa_core::{Operation, OperationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::tool::ToolSpec;

/// Where a tool input reads its data from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputSource {
    /// A dataset of the request's data context
    Dataset { name: String },
    /// An output of an upstream operation
    Upstream {
        operation: OperationId,
        output: String,
    },
}

impl InputSource {
    pub fn dataset(name: &str) -> Self {
        InputSource::Dataset {
            name: name.to_string(),
        }
    }

    pub fn upstream(operation: OperationId, output: &str) -> Self {
        InputSource::Upstream {
            operation,
            output: output.to_string(),
        }
    }
}

/// One tool chosen for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundTool {
    pub tool: ToolSpec,
    /// Parameter values keyed by parameter name
    pub parameters: BTreeMap<String, Value>,
    /// Explicit input sources keyed by input port name
    pub inputs: BTreeMap<String, InputSource>,
}

impl BoundTool {
    /// Bind a tool with its declared defaults filled in
    pub fn new(tool: ToolSpec) -> Self {
        let parameters = tool
            .parameters
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect();
        Self {
            tool,
            parameters,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_input(mut self, port: &str, source: InputSource) -> Self {
        self.inputs.insert(port.to_string(), source);
        self
    }

    /// Required parameters without a value
    pub fn missing_parameters(&self) -> Vec<&str> {
        self.tool
            .parameters
            .iter()
            .filter(|p| p.required && !self.parameters.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Tools chosen for one operation, ranked best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub operation: Operation,
    pub tools: Vec<BoundTool>,
    /// Why no tool could be bound
    #[serde(default)]
    pub unresolved_reason: Option<String>,
}

impl ToolBinding {
    pub fn resolved(operation: Operation, tools: Vec<BoundTool>) -> Self {
        Self {
            operation,
            tools,
            unresolved_reason: None,
        }
    }

    pub fn unresolved(operation: Operation, reason: impl Into<String>) -> Self {
        Self {
            operation,
            tools: Vec::new(),
            unresolved_reason: Some(reason.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.tools.is_empty()
    }

    /// First-ranked tool
    pub fn primary(&self) -> Option<&BoundTool> {
        self.tools.first()
    }

    /// Reason for an empty binding
    pub fn reason(&self) -> &str {
        self.unresolved_reason
            .as_deref()
            .unwrap_or("no tool selected")
    }
}
