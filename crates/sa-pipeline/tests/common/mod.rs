//! Shared fixtures for pipeline scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use sa_core::{
    AgentSettings, DataContext, DataKind, DatasetSummary, Diagnostic, Error, ExecutionAttempt,
    OperationCategory, Result,
};
use sa_llm::{
    BackendError, BackendProfile, BackendRouter, CompletionRequest, CompletionResponse,
    ProviderType, ReasoningBackend,
};
use sa_pipeline::prompts;
use sa_pipeline::sandbox::{collect_artifacts, ExecutionContext, ExecutionSandbox, RunWorkspace};
use sa_tools::{InMemoryCatalog, OperationCatalog, ParameterSpec, ToolSpec};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// BACKEND
// ============================================================================

/// Stage a request belongs to, read from its system message
pub fn stage_of(request: &CompletionRequest) -> &'static str {
    let system = request
        .messages
        .first()
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    [
        (prompts::NAMING_ROLE, "naming"),
        (prompts::DATA_OVERVIEW_ROLE, "overview"),
        (prompts::DECOMPOSITION_ROLE, "decomposition"),
        (prompts::SELECTION_ROLE, "selection"),
        (prompts::REVIEW_ROLE, "review"),
        (prompts::DEBUG_ROLE, "debug"),
    ]
    .iter()
    .find(|(role, _)| *role == system)
    .map(|(_, stage)| *stage)
    .unwrap_or("unknown")
}

/// Backend answering per stage; the last reply of a stage repeats
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<&'static str, VecDeque<std::result::Result<String, BackendError>>>>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, stage: &'static str, reply: &str) -> Self {
        self.push(stage, Ok(reply.to_string()))
    }

    pub fn fail(self, stage: &'static str, error: BackendError) -> Self {
        self.push(stage, Err(error))
    }

    fn push(self, stage: &'static str, reply: std::result::Result<String, BackendError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    /// Number of calls made for `stage`
    pub fn calls(&self, stage: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| *s == stage).count()
    }

    /// User messages sent for `stage`, in call order
    pub fn prompts(&self, stage: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, BackendError> {
        let stage = stage_of(&request);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().unwrap().push((stage, prompt));

        let mut replies = self.replies.lock().unwrap();
        let queue = replies.entry(stage).or_default();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply
            .unwrap_or_else(|| {
                let missing = format!("no reply scripted for {}", stage);
                Err(BackendError::InvalidResponse(missing))
            })
            .map(|content| CompletionResponse::text(content, request.options.model.clone()))
    }
}

pub fn router(backend: Arc<ScriptedBackend>) -> Arc<BackendRouter> {
    Arc::new(BackendRouter::new().register(BackendProfile::new("gpt-4o", backend)))
}

// ============================================================================
// SANDBOX
// ============================================================================

/// Sandbox failing until the script contains `marker`
///
/// Successful attempts write one file per expected output into the attempt
/// namespace. Failures carry a KeyError naming the attempt index.
pub struct ScriptedSandbox {
    root: PathBuf,
    marker: String,
    pub executions: Mutex<Vec<(Uuid, u32, PathBuf, String)>>,
}

impl ScriptedSandbox {
    pub fn new(root: &Path, marker: &str) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            marker: marker.to_string(),
            executions: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.executions.lock().unwrap().iter().map(|e| e.3.clone()).collect()
    }
}

pub fn key_error(field: &str) -> Diagnostic {
    Diagnostic {
        exception_type: Some("KeyError".into()),
        message: format!("'{}'", field),
        line: Some(12),
        node_id: Some("n1_native_buffer".into()),
        raw: format!(
            "Traceback (most recent call last):\n  File \"script.py\", line 12, in <module>\nKeyError: '{}'",
            field
        ),
    }
}

#[async_trait]
impl ExecutionSandbox for ScriptedSandbox {
    async fn execute(&self, script: &str, ctx: &ExecutionContext) -> Result<ExecutionAttempt> {
        let paths = RunWorkspace::new(&self.root, ctx.run_id).prepare_attempt(ctx.index, script)?;
        self.executions.lock().unwrap().push((
            ctx.run_id,
            ctx.index,
            paths.outputs.clone(),
            script.to_string(),
        ));

        let attempt = ExecutionAttempt::begin(ctx.index, script, &paths.outputs);
        if !script.contains(&self.marker) {
            let diag = key_error(&format!("field_{}", ctx.index));
            return Ok(attempt.fail(diag, String::new(), vec![]));
        }
        for name in &ctx.expected_outputs {
            std::fs::write(paths.outputs.join(format!("{}.gpkg", name)), b"layer")?;
        }
        Ok(attempt.succeed("done\n".into(), collect_artifacts(&paths.outputs)))
    }
}

/// Sandbox whose interpreter goes missing from attempt `from` on
pub struct FlakySandbox {
    pub inner: Arc<ScriptedSandbox>,
    pub from: u32,
}

#[async_trait]
impl ExecutionSandbox for FlakySandbox {
    async fn execute(&self, script: &str, ctx: &ExecutionContext) -> Result<ExecutionAttempt> {
        if ctx.index >= self.from {
            return Err(Error::sandbox("failed to start python3"));
        }
        self.inner.execute(script, ctx).await
    }
}

/// Sandbox that blocks until the run is cancelled
pub struct BlockingSandbox;

#[async_trait]
impl ExecutionSandbox for BlockingSandbox {
    async fn execute(&self, _script: &str, ctx: &ExecutionContext) -> Result<ExecutionAttempt> {
        ctx.cancel.cancelled().await;
        Err(Error::Cancelled("attempt interrupted".into()))
    }
}

// ============================================================================
// CATALOG AND DATA
// ============================================================================

pub fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("native:buffer", "Buffer", OperationCategory::Transform)
            .with_description("Buffer features by a fixed distance")
            .with_tags(&["buffer", "distance"])
            .with_input("INPUT", DataKind::Vector)
            .with_parameter(ParameterSpec::required("DISTANCE", "number"))
            .with_output("OUTPUT", DataKind::Vector),
        ToolSpec::new("native:clip", "Clip", OperationCategory::Overlay)
            .with_description("Clip a vector layer by an overlay layer")
            .with_input("INPUT", DataKind::Vector)
            .with_input("OVERLAY", DataKind::Vector)
            .with_output("OUTPUT", DataKind::Vector),
        ToolSpec::new("native:fieldcalculator", "Field calculator", OperationCategory::Compute)
            .with_description("Compute a new attribute field from an expression")
            .with_input("INPUT", DataKind::Vector)
            .with_parameter(ParameterSpec::required("FIELD_NAME", "string"))
            .with_parameter(ParameterSpec::required("FORMULA", "string"))
            .with_output("OUTPUT", DataKind::Vector),
    ]
}

pub async fn catalog() -> Arc<dyn OperationCatalog> {
    Arc::new(InMemoryCatalog::from_tools(tools()).await.unwrap())
}

pub fn points() -> DataContext {
    DataContext::new(vec![DatasetSummary::new("points", DataKind::Vector)
        .with_geometry("Point")
        .with_crs("EPSG:32633")
        .with_field("population", "integer")])
}

pub fn settings(workspace: &Path, max_attempts: u32) -> AgentSettings {
    AgentSettings::default()
        .with_backend("gpt-4o")
        .with_max_attempts(max_attempts)
        .with_review(false)
        .with_workspace_dir(workspace)
}

// ============================================================================
// REPLIES
// ============================================================================

pub const BUFFER_DECOMPOSITION: &str = r#"```json
{"summary": "Buffer the points layer by 100 meters.",
 "operations": [
   {"id": 1, "label": "Buffer points", "description": "buffer points by 100 m distance", "category": "transform"}
 ]}
```"#;

pub const BUFFER_SELECTION: &str = r#"{"tools": [{"name": "native:buffer",
  "parameters": {"DISTANCE": 100},
  "inputs": {"INPUT": {"source": "dataset", "name": "points"}}}]}"#;

pub fn buffer_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .on("naming", "buffer_points")
        .on("decomposition", BUFFER_DECOMPOSITION)
        .on("selection", BUFFER_SELECTION)
}
