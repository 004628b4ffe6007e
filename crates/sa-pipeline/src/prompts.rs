//! Prompt templates for every backend stage
//!
//! Each stage sends one system message (its role) and one user message made
//! of a task prefix, a numbered requirement list and the stage's context.
//! Replies are parsed in `parsing`, so every prompt pins the reply format.

use sa_core::{DataContext, Operation, TaskSpec};
use sa_llm::ChatMessage;
use sa_tools::ToolSpec;

// ============================================================================
// ROLES
// ============================================================================

pub const NAMING_ROLE: &str = "You are a GIS analyst who names analysis tasks. \
You answer with a task name only.";

pub const DATA_OVERVIEW_ROLE: &str = "You are a professional geo-information scientist. \
You decide which of the available datasets a spatial analysis request needs.";

pub const DECOMPOSITION_ROLE: &str = "You are a GIS expert. You convert a user request \
into a short GIS task description made of labeled, ordered operations.";

pub const SELECTION_ROLE: &str = "You are a professional geo-information scientist with \
high proficiency in geoprocessing tools. You select the most appropriate tools for one \
GIS operation and set their parameters.";

pub const REVIEW_ROLE: &str = "You are a professional geo-information scientist and Python \
developer who specializes in code review. You are meticulous and enjoy identifying \
potential bugs and data misunderstandings in code.";

pub const DEBUG_ROLE: &str = "You are a professional geo-information scientist and a \
programmer good at Python. You know every detail and pitfall when processing spatial \
data and coding, and you repair failing geoprocessing scripts.";

// ============================================================================
// REQUIREMENTS
// ============================================================================

const NAMING_REQUIREMENTS: &[&str] = &[
    "Use one or two words that describe the task.",
    "Use lowercase letters and underscores only, no spaces or punctuation.",
    "Reply with the name only.",
];

const DATA_OVERVIEW_REQUIREMENTS: &[&str] = &[
    "Include every dataset the request needs, and only those.",
    "Use the dataset names exactly as listed.",
    "Reply with JSON only: {\"datasets\": [\"<name>\", ...]}.",
];

const DECOMPOSITION_REQUIREMENTS: &[&str] = &[
    "Do NOT include steps related to data acquisition or downloading data.",
    "Do NOT mention specific software.",
    "Focus ONLY on spatial analysis or GIS operations.",
    "Use technical GIS terms where appropriate (e.g. Buffer, Clip, Reproject, Attribute Query).",
    "Refer to datasets by the names given in the data overview.",
    "Only reproject when an operation needs a projected CRS and the layers have different projections.",
    "Start each operation with a short label.",
    "Number operations from 1. An operation may only depend on operations listed before it.",
    "Category is one of: filter, compute, aggregate, transform, overlay, reproject, join, visualize, io, other.",
    "Reply with JSON only, no explanation.",
];

const DECOMPOSITION_FORMAT: &str = r#"{
  "summary": "<one paragraph GIS task description>",
  "operations": [
    {"id": 1, "label": "<label>", "description": "<what it does>", "category": "<category>", "depends_on": []}
  ]
}"#;

const SELECTION_REQUIREMENTS: &[&str] = &[
    "Choose only from the candidate tools listed below, using their exact names.",
    "List the best-fit tool first. Recommend more than one tool only when the operation needs several steps.",
    "Set every required parameter. Use the units of the data's CRS for distances.",
    "Bind inputs to a dataset by name or to the output of an earlier operation.",
    "Do not explain why a tool is selected.",
    "Reply with JSON only in the format shown.",
];

const SELECTION_FORMAT: &str = r#"{
  "tools": [
    {
      "name": "<tool name>",
      "parameters": {"<PARAMETER>": <value>},
      "inputs": {
        "<INPUT PORT>": {"source": "dataset", "name": "<dataset name>"},
        "<OTHER PORT>": {"source": "upstream", "operation": <operation id>, "output": "<OUTPUT PORT>"}
      }
    }
  ]
}"#;

const REVIEW_REQUIREMENTS: &[&str] = &[
    "Review the code very carefully to ensure it meets the task and the tool documentation.",
    "Compare each tool call with its documentation and ensure the parameters are set correctly.",
    "Keep every `# @node <id>` marker line and the order of the node blocks.",
    "Keep the dataset loading and output saving lines of the scaffold.",
    "The code must not contain validity checks and must not raise exceptions of its own.",
    "If the code is correct, return it unchanged.",
    "Return the complete program in one Python code block (enclosed by ```python and ```).",
];

const DEBUG_REQUIREMENTS: &[&str] = &[
    "Analyze the error pattern and apply the suggested strategies where they fit.",
    "Elaborate your reasons for revision as Python comments at the beginning of the code block.",
    "You must return the entire corrected program in only one Python code block (enclosed by ```python and ```); DO NOT return the revised part only.",
    "Keep every `# @node <id>` marker line so errors can be attributed to workflow nodes.",
    "Keep the dataset loading and output saving lines of the scaffold.",
    "If a field is missing, check the attribute schema in the data overview and use an existing field.",
    "Only reproject when an operation needs a projected CRS and the layers have different projections.",
];

fn numbered(items: &[&str]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// MESSAGE BUILDERS
// ============================================================================

pub fn naming_messages(goal: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(NAMING_ROLE),
        ChatMessage::user(format!(
            "Give a short name to this task.\n\nRequirements:\n{}\n\nTask: {}",
            numbered(NAMING_REQUIREMENTS),
            goal
        )),
    ]
}

pub fn data_overview_messages(goal: &str, data: &DataContext) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DATA_OVERVIEW_ROLE),
        ChatMessage::user(format!(
            "Select the datasets needed for the request.\n\nRequirements:\n{}\n\nRequest: {}\n\nAvailable datasets:\n{}",
            numbered(DATA_OVERVIEW_REQUIREMENTS),
            goal,
            data.render()
        )),
    ]
}

pub fn decomposition_messages(goal: &str, data: &DataContext) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DECOMPOSITION_ROLE),
        ChatMessage::user(format!(
            "Think step-by-step about what the user is asking, then write a concise, \
             domain-specific description of the GIS task as ordered operations.\n\n\
             Requirements:\n{}\n\nUser request:\n{}\n\nData overview:\n{}\n\nOutput format:\n{}",
            numbered(DECOMPOSITION_REQUIREMENTS),
            goal,
            data.render(),
            DECOMPOSITION_FORMAT
        )),
    ]
}

/// Follow-up quoting why the previous reply was rejected
pub fn correction_message(error: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "Your previous reply could not be used: {}\n\
         Reply again with JSON only, following the output format exactly.",
        error
    ))
}

/// Tool selection prompt for one operation
///
/// `earlier` lists the operations before this one together with the output
/// ports of the tool bound to them, if any.
pub fn selection_messages(
    spec: &TaskSpec,
    operation: &Operation,
    candidates: &[ToolSpec],
    data: &DataContext,
    earlier: &[(Operation, Vec<String>)],
) -> Vec<ChatMessage> {
    let docs = candidates
        .iter()
        .map(ToolSpec::documentation)
        .collect::<Vec<_>>()
        .join("\n");

    let upstream = if earlier.is_empty() {
        "None".to_string()
    } else {
        earlier
            .iter()
            .map(|(op, outputs)| {
                if outputs.is_empty() {
                    format!("- operation {} ({}): unresolved", op.id, op.label)
                } else {
                    format!("- operation {} ({}): outputs {}", op.id, op.label, outputs.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![
        ChatMessage::system(SELECTION_ROLE),
        ChatMessage::user(format!(
            "Select the tools for operation {} of the task.\n\nRequirements:\n{}\n\n\
             Task summary: {}\n\nOperation: {}\nCategory: {}\nDepends on: {:?}\n\n\
             Earlier operations:\n{}\n\nData overview:\n{}\n\nCandidate tools:\n{}\nOutput format:\n{}",
            operation.id,
            numbered(SELECTION_REQUIREMENTS),
            spec.summary,
            operation.query_text(),
            operation.category,
            operation.depends_on,
            upstream,
            data.render(),
            docs,
            SELECTION_FORMAT
        )),
    ]
}

pub fn review_messages(
    summary: &str,
    data: &DataContext,
    tool_docs: &str,
    script: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEW_ROLE),
        ChatMessage::user(format!(
            "Review the code of a program to determine whether it meets its task and the \
             tool documentation. If it does not, correct it and return the complete corrected code.\n\n\
             Requirements:\n{}\n\nTask: {}\n\nData overview:\n{}\n\nTool documentation:\n{}\n\
             Code:\n```python\n{}\n```",
            numbered(REVIEW_REQUIREMENTS),
            summary,
            data.render(),
            tool_docs,
            script.trim_end()
        )),
    ]
}

/// Everything the repair prompt shows besides the failing script
#[derive(Debug, Clone, Default)]
pub struct RepairBrief {
    pub goal: String,
    pub summary: String,
    pub data_overview: String,
    /// Node outline of the workflow graph
    pub graph_outline: String,
    pub tool_docs: String,
}

pub fn debug_messages(
    brief: &RepairBrief,
    script: &str,
    diagnostic: &str,
    hints: &str,
) -> Vec<ChatMessage> {
    let hints = if hints.trim().is_empty() {
        String::new()
    } else {
        format!("Error analysis:\n{}\n\n", hints)
    };
    vec![
        ChatMessage::system(DEBUG_ROLE),
        ChatMessage::user(format!(
            "You need to correct the code of a program based on the given error information, \
             then return the complete corrected code.\n\nRequirements:\n{}\n\n\
             Request: {}\n\nTask: {}\n\nData overview:\n{}\n\nWorkflow:\n{}\n\n\
             Tool documentation:\n{}\n{}Error information:\n{}\n\n\
             Code:\n```python\n{}\n```",
            numbered(DEBUG_REQUIREMENTS),
            brief.goal,
            brief.summary,
            brief.data_overview,
            brief.graph_outline,
            brief.tool_docs,
            hints,
            diagnostic,
            script.trim_end()
        )),
    ]
}
