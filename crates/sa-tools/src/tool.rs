//! Catalog entry types
//!
//! A ToolSpec describes one geoprocessing operation offered by the host:
//! its typed input and output ports and its parameter schema.

use sa_core::task::slugify;
use sa_core::{DataKind, Error, OperationCategory, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A typed data port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub kind: DataKind,
    #[serde(default)]
    pub description: String,
}

impl PortSpec {
    pub fn new(name: &str, kind: DataKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: String::new(),
        }
    }
}

/// A scalar parameter of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Value type: number, integer, string, boolean, field, crs, ...
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl ParameterSpec {
    pub fn required(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: &str, param_type: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: false,
            default: Some(default),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique identifier, e.g. `native:buffer`
    pub name: String,
    /// Human-readable title
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: OperationCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    /// Reference snippet shown to the code generation stage
    #[serde(default)]
    pub code_example: Option<String>,
}

impl ToolSpec {
    pub fn new(name: &str, title: &str, category: OperationCategory) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: String::new(),
            category,
            tags: Vec::new(),
            inputs: Vec::new(),
            parameters: Vec::new(),
            outputs: Vec::new(),
            code_example: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_input(mut self, name: &str, kind: DataKind) -> Self {
        self.inputs.push(PortSpec::new(name, kind));
        self
    }

    pub fn with_output(mut self, name: &str, kind: DataKind) -> Self {
        self.outputs.push(PortSpec::new(name, kind));
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_code_example(mut self, example: &str) -> Self {
        self.code_example = Some(example.to_string());
        self
    }

    /// Identifier-safe slug, e.g. `native_buffer`
    pub fn slug(&self) -> String {
        slugify(&self.name, 48)
    }

    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Text indexed for retrieval
    pub fn search_text(&self) -> String {
        let mut parts = vec![
            self.name.replace([':', '_'], " "),
            self.title.clone(),
            self.description.clone(),
            self.category.to_string(),
        ];
        parts.extend(self.tags.iter().cloned());
        parts.join(" ")
    }

    /// Compact documentation block for prompts
    pub fn documentation(&self) -> String {
        let mut out = format!("Tool: {}", self.name);
        if !self.title.is_empty() {
            out.push_str(&format!(" ({})", self.title));
        }
        out.push('\n');
        if !self.description.is_empty() {
            out.push_str(&format!("Description: {}\n", self.description));
        }
        for port in &self.inputs {
            out.push_str(&format!("Input {}: {}\n", port.name, port.kind));
        }
        for param in &self.parameters {
            let requirement = if param.required { "required" } else { "optional" };
            out.push_str(&format!(
                "Parameter {} ({}, {})",
                param.name, param.param_type, requirement
            ));
            if let Some(default) = &param.default {
                out.push_str(&format!(" default={}", default));
            }
            if !param.description.is_empty() {
                out.push_str(&format!(": {}", param.description));
            }
            out.push('\n');
        }
        for port in &self.outputs {
            out.push_str(&format!("Output {}: {}\n", port.name, port.kind));
        }
        if let Some(example) = &self.code_example {
            out.push_str(&format!("Example:\n{}\n", example.trim_end()));
        }
        out
    }

    /// Reject entries the graph builder could not wire
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("tool name must not be empty".into()));
        }
        if self.outputs.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "tool '{}' declares no outputs",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for name in self
            .inputs
            .iter()
            .map(|p| &p.name)
            .chain(self.parameters.iter().map(|p| &p.name))
        {
            if !seen.insert(name) {
                return Err(Error::InvalidArgument(format!(
                    "tool '{}' declares '{}' twice",
                    self.name, name
                )));
            }
        }
        Ok(())
    }
}
