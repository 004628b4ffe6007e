//! Reply parsing
//!
//! Backend replies are free text. Everything the pipeline consumes passes
//! through this module: JSON is taken from a fenced block or the longest
//! bracketed value in the prose and deserialized into strict schemas, code is taken from a
//! Python fenced block.

use lazy_static::lazy_static;
use regex::Regex;
use sa_core::{Error, Operation, OperationCategory, OperationId, Result, TaskSpec};
use sa_tools::InputSource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

lazy_static! {
    static ref FENCE: Regex = Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").unwrap();
}

/// Why a reply could not be used
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ReplyError {
    #[error("reply contains no JSON object")]
    NoJson,

    #[error("reply does not match the expected schema: {0}")]
    Schema(String),

    #[error("reply is invalid: {0}")]
    Invalid(String),
}

/// JSON text of a reply: first fenced block holding JSON, else the longest
/// well-formed object or array
pub fn extract_json(reply: &str) -> Option<&str> {
    for caps in FENCE.captures_iter(reply) {
        let lang = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        let is_json_lang = lang.is_empty() || lang.eq_ignore_ascii_case("json");
        if is_json_lang && (body.starts_with('{') || body.starts_with('[')) {
            return Some(body);
        }
    }

    // Longest value parsing from any opening bracket, so prose brackets
    // around the payload are skipped
    let mut best: Option<&str> = None;
    let mut from = 0;
    while let Some(offset) = reply[from..].find(['{', '[']) {
        let start = from + offset;
        match leading_value(&reply[start..]) {
            Some(len) => {
                let value = &reply[start..start + len];
                if best.map_or(true, |b| value.len() > b.len()) {
                    best = Some(value);
                }
                from = start + len;
            }
            None => from = start + 1,
        }
    }
    best
}

/// Byte length of the JSON value at the start of `text`
fn leading_value(text: &str) -> Option<usize> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(_)) => Some(stream.byte_offset()),
        _ => None,
    }
}

/// Deserialize the JSON part of a reply
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> std::result::Result<T, ReplyError> {
    let json = extract_json(reply).ok_or(ReplyError::NoJson)?;
    serde_json::from_str(json).map_err(|e| ReplyError::Schema(e.to_string()))
}

/// Code of the first Python fenced block, else of the first untagged block
pub fn extract_code(reply: &str) -> Option<String> {
    let mut untagged = None;
    for caps in FENCE.captures_iter(reply) {
        let lang = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let body = caps.get(2).map_or("", |m| m.as_str());
        if body.trim().is_empty() {
            continue;
        }
        match lang.as_str() {
            "python" | "py" | "python3" => return Some(normalize_code(body)),
            "" if untagged.is_none() => untagged = Some(normalize_code(body)),
            _ => {}
        }
    }
    untagged
}

fn normalize_code(body: &str) -> String {
    let mut code = body.trim_end().to_string();
    code.push('\n');
    code
}

fn lenient_category<'de, D>(deserializer: D) -> std::result::Result<OperationCategory, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let wanted = raw.trim().to_lowercase();
    Ok(OperationCategory::ALL
        .into_iter()
        .find(|c| c.to_string() == wanted)
        .unwrap_or(OperationCategory::Other))
}

fn default_category() -> OperationCategory {
    OperationCategory::Other
}

// ============================================================================
// DECOMPOSITION
// ============================================================================

/// One operation as returned by the decomposition stage
#[derive(Debug, Clone, Deserialize)]
pub struct OperationReply {
    pub id: OperationId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category", deserialize_with = "lenient_category")]
    pub category: OperationCategory,
    #[serde(default)]
    pub depends_on: Vec<OperationId>,
}

/// Decomposition stage reply
#[derive(Debug, Clone, Deserialize)]
pub struct DecompositionReply {
    pub summary: String,
    pub operations: Vec<OperationReply>,
}

impl DecompositionReply {
    /// Validated TaskSpec named `name`
    pub fn into_task_spec(self, name: &str) -> Result<TaskSpec> {
        if self.operations.is_empty() {
            return Err(Error::decomposition("reply lists no operations"));
        }
        if let Some(op) = self.operations.iter().find(|o| o.label.trim().is_empty()) {
            return Err(Error::decomposition(format!("operation {} has an empty label", op.id)));
        }
        let operations = self
            .operations
            .into_iter()
            .map(|o| {
                Operation::new(o.id, o.label.trim(), o.category)
                    .with_description(o.description.trim())
                    .depends_on(&o.depends_on)
            })
            .collect();
        TaskSpec::new(name, self.summary.trim(), operations)
    }
}

// ============================================================================
// DATA OVERVIEW
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DataOverviewReply {
    pub datasets: Vec<String>,
}

// ============================================================================
// TOOL SELECTION
// ============================================================================

/// One tool chosen by the selection stage
#[derive(Debug, Clone, Deserialize)]
pub struct SelectedTool {
    #[serde(alias = "tool_id", alias = "tool")]
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSource>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionShape {
    Wrapped { tools: Vec<SelectedTool> },
    Bare(Vec<SelectedTool>),
}

/// Selection stage reply, either `{"tools": [...]}` or a bare list
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "SelectionShape")]
pub struct SelectionReply {
    pub tools: Vec<SelectedTool>,
}

impl From<SelectionShape> for SelectionReply {
    fn from(shape: SelectionShape) -> Self {
        match shape {
            SelectionShape::Wrapped { tools } | SelectionShape::Bare(tools) => Self { tools },
        }
    }
}
