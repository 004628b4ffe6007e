//! TOML tool documentation loader
//!
//! One file per tool:
//!
//! ```toml
//! tool_ID = "native:buffer"
//! tool_name = "Buffer"
//! brief_description = "Computes a buffer area for all the features in an input layer"
//! category = "transform"
//! tags = ["distance", "zone"]
//! code_example = """
//! processing.run("native:buffer", {...})
//! """
//!
//! [[inputs]]
//! name = "INPUT"
//! kind = "vector"
//!
//! [[parameters]]
//! name = "DISTANCE"
//! type = "number"
//! required = true
//!
//! [[outputs]]
//! name = "OUTPUT"
//! kind = "vector"
//! ```
//!
//! Files that fail to parse are skipped with a warning.

use sa_core::{Error, OperationCategory, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::tool::{ParameterSpec, PortSpec, ToolSpec};

#[derive(Debug, Deserialize)]
struct ToolDocument {
    #[serde(alias = "tool_ID", alias = "tool_id")]
    name: String,
    #[serde(default, alias = "tool_name")]
    title: String,
    #[serde(default, alias = "brief_description")]
    description: String,
    #[serde(default = "default_category")]
    category: OperationCategory,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    inputs: Vec<PortSpec>,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    #[serde(default)]
    outputs: Vec<PortSpec>,
    #[serde(default)]
    code_example: Option<String>,
}

fn default_category() -> OperationCategory {
    OperationCategory::Other
}

impl From<ToolDocument> for ToolSpec {
    fn from(doc: ToolDocument) -> Self {
        ToolSpec {
            name: doc.name,
            title: doc.title,
            description: doc.description.trim().to_string(),
            category: doc.category,
            tags: doc.tags,
            inputs: doc.inputs,
            parameters: doc.parameters,
            outputs: doc.outputs,
            code_example: doc.code_example,
        }
    }
}

/// Parse one tool document
pub fn parse_tool_doc(content: &str) -> Result<ToolSpec> {
    let doc: ToolDocument =
        toml::from_str(content).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let tool = ToolSpec::from(doc);
    tool.validate()?;
    Ok(tool)
}

/// Load every `*.toml` document under `dir`, ordered by path
pub fn load_tool_docs(dir: &Path) -> Result<Vec<ToolSpec>> {
    if !dir.is_dir() {
        return Err(Error::not_found(format!(
            "tool documentation directory {}",
            dir.display()
        )));
    }

    let mut tools = Vec::new();
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter();
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml")
        {
            continue;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        match parse_tool_doc(&content) {
            Ok(tool) => {
                debug!("Loaded tool documentation: {}", tool.name);
                tools.push(tool);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(tools)
}
