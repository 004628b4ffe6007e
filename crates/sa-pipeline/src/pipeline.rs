//! Pipeline entry point
//!
//! `Orchestrator::run` drives one request through every stage, strictly in
//! sequence:
//!
//! ```text
//! naming -> data overview -> decomposition -> tool selection -> graph
//!   -> synthesis -> (review) -> execution <-> debug loop
//! ```
//!
//! Structural errors return `Err` before anything executes. Once execution
//! has started, the run always ends in a `RunResult`.

use chrono::{DateTime, Utc};
use sa_core::{
    AgentSettings, AttemptChain, Diagnostic, Error, Request, Result, RunStatus,
    TaskSpec, UnresolvedOperation,
};
use sa_llm::{BackendRouter, Stage};
use sa_tools::OperationCatalog;
use sa_workflows::export::write_exports;
use sa_workflows::{GraphBuilder, NodeInput, WorkflowGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::data::{DataCollaborator, DatasetHandle};
use crate::debug::DebugLoop;
use crate::decomposer::TaskDecomposer;
use crate::prompts::RepairBrief;
use crate::review::ScriptReviewer;
use crate::sandbox::{ExecutionSandbox, RunWorkspace};
use crate::selector::ToolSelector;
use crate::synthesizer::CodeSynthesizer;

/// Final record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub task_spec: TaskSpec,
    pub graph: WorkflowGraph,
    /// Operations left out of the graph, with reasons
    pub unresolved: Vec<UnresolvedOperation>,
    pub attempts: AttemptChain,
    pub status: RunStatus,
    /// Human-readable report
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    fn new(
        run_id: Uuid,
        task_spec: TaskSpec,
        graph: WorkflowGraph,
        unresolved: Vec<UnresolvedOperation>,
        attempts: AttemptChain,
        status: RunStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        let summary = summarize(&task_spec, &graph, &unresolved, &attempts, status);
        Self {
            run_id,
            task_spec,
            graph,
            unresolved,
            attempts,
            status,
            summary,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.attempts.last_diagnostic()
    }

    /// Artifacts of the final attempt
    pub fn artifacts(&self) -> &[PathBuf] {
        self.attempts
            .last()
            .map(|a| a.artifacts.as_slice())
            .unwrap_or_default()
    }
}

fn summarize(
    spec: &TaskSpec,
    graph: &WorkflowGraph,
    unresolved: &[UnresolvedOperation],
    attempts: &AttemptChain,
    status: RunStatus,
) -> String {
    let mut out = String::new();
    let n = attempts.len();
    let headline = match status {
        _ if graph.is_empty() => "no executable operations".to_string(),
        RunStatus::Success => format!("succeeded after {} attempt(s)", n),
        RunStatus::Failure => format!("failed after {} attempt(s)", n),
        RunStatus::Cancelled => format!("cancelled after {} attempt(s)", n),
    };
    let _ = writeln!(out, "Task '{}': {}", spec.name, headline);
    if !spec.summary.is_empty() {
        let _ = writeln!(out, "{}", spec.summary);
    }
    let _ = writeln!(
        out,
        "Workflow: {} node(s) from {} operation(s), {} edge(s)",
        graph.len(),
        spec.len(),
        graph.edges.len()
    );

    if !unresolved.is_empty() {
        let _ = writeln!(out, "Unresolved operations:");
        for u in unresolved {
            let _ = writeln!(out, "- {} {}: {}", u.operation_id, u.label, u.reason);
        }
    }

    if let Some(last) = attempts.last() {
        if last.is_success() && !last.artifacts.is_empty() {
            let _ = writeln!(out, "Artifacts:");
            for a in &last.artifacts {
                let _ = writeln!(out, "- {}", a.display());
            }
        }
        if !last.is_success() {
            if let Some(diag) = &last.diagnostic {
                let _ = writeln!(out, "Last error after {} attempt(s):", n);
                let _ = writeln!(out, "{}", diag.render());
            }
        }
    }
    out
}

/// Node outline for the repair prompt
fn outline(graph: &WorkflowGraph) -> String {
    graph
        .nodes
        .iter()
        .map(|node| {
            let inputs: Vec<String> = node
                .inputs
                .iter()
                .map(|(port, b)| match &b.source {
                    NodeInput::Dataset { name } => format!("{} <- dataset {}", port, name),
                    NodeInput::Node { node, output } => format!("{} <- {}.{}", port, node, output),
                })
                .collect();
            let outputs: Vec<&str> = node.outputs.iter().map(|o| o.variable.as_str()).collect();
            format!(
                "- {} [{}] {}; inputs: {}; outputs: {}",
                node.id,
                node.tool,
                node.label,
                inputs.join(", "),
                outputs.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn ensure_not_cancelled(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(format!("before {}", stage)));
    }
    Ok(())
}

/// Runs requests against shared read-only collaborators
pub struct Orchestrator {
    catalog: Arc<dyn OperationCatalog>,
    router: Arc<BackendRouter>,
    sandbox: Arc<dyn ExecutionSandbox>,
    data: Option<Arc<dyn DataCollaborator>>,
    settings: AgentSettings,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn OperationCatalog>,
        router: Arc<BackendRouter>,
        sandbox: Arc<dyn ExecutionSandbox>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            catalog,
            router,
            sandbox,
            data: None,
            settings,
        }
    }

    /// Resolve dataset handles through `data` when synthesizing
    pub fn with_data_collaborator(mut self, data: Arc<dyn DataCollaborator>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run one request to completion
    pub async fn run(&self, request: &Request, cancel: CancellationToken) -> Result<RunResult> {
        let span = info_span!("run", run_id = %request.id());
        self.run_inner(request, &cancel).instrument(span).await
    }

    async fn run_inner(&self, request: &Request, cancel: &CancellationToken) -> Result<RunResult> {
        let started_at = Utc::now();
        let backend = self.settings.backend.as_str();

        // Every stage resolves before the first call
        self.router.check(backend)?;
        let decomposer = TaskDecomposer::new(&self.router, backend)?;
        let selector = ToolSelector::new(self.catalog.clone(), &self.router, backend)?
            .with_retrieval(self.settings.retrieval_enabled)
            .with_candidate_limit(self.settings.candidate_limit);
        let reviewer = if self.settings.review_enabled {
            Some(ScriptReviewer::new(&self.router, backend)?)
        } else {
            None
        };
        let debug = DebugLoop::new(
            self.sandbox.clone(),
            &self.router,
            backend,
            self.settings.max_attempts,
        )?;

        info!(backend = %backend, goal = %request.goal(), "Run started");
        ensure_not_cancelled(cancel, "naming")?;

        info!(stage = %Stage::Naming, "Stage started");
        let name = decomposer.name_task(request.goal(), cancel).await?;

        info!(stage = %Stage::DataOverview, "Stage started");
        let data = decomposer.overview(request.goal(), request.data(), cancel).await?;

        info!(stage = %Stage::Decomposition, "Stage started");
        let spec = decomposer.decompose(request, &data, &name, cancel).await?;

        info!(stage = %Stage::ToolSelection, operations = spec.len(), "Stage started");
        let bindings = selector.select(&spec, &data, cancel).await?;

        info!(stage = %Stage::WorkflowGraph, "Stage started");
        let build = GraphBuilder::new(&data).build(&spec.name, &bindings)?;
        let workspace = RunWorkspace::new(&self.settings.workspace_dir, request.id());
        if let Err(e) = write_exports(&build.graph, &workspace.export_dir()) {
            warn!(error = %e, "Failed to export workflow graph");
        }

        if build.graph.is_empty() {
            warn!(omitted = build.omitted.len(), "No executable operations");
            return Ok(RunResult::new(
                request.id(),
                spec,
                build.graph,
                build.omitted,
                AttemptChain::new(),
                RunStatus::Failure,
                started_at,
            ));
        }

        info!(stage = %Stage::CodeGeneration, nodes = build.graph.len(), "Stage started");
        let handles = self.resolve_handles(&build.graph).await;
        let mut script = CodeSynthesizer::new(self.settings.runtime_module.as_str())
            .with_handles(handles)
            .synthesize(&build.graph);
        let tool_docs = self.tool_docs(&build.graph).await;

        if let Some(reviewer) = &reviewer {
            script = reviewer
                .review(&spec.summary, &data, &tool_docs, script, cancel)
                .await?;
        }
        ensure_not_cancelled(cancel, "execution")?;

        info!(stage = %Stage::Debugging, max_attempts = self.settings.max_attempts, "Execution started");
        let brief = RepairBrief {
            goal: request.goal().to_string(),
            summary: spec.summary.clone(),
            data_overview: data.render(),
            graph_outline: outline(&build.graph),
            tool_docs,
        };
        let outcome = debug
            .with_brief(brief)
            .run(
                request.id(),
                script,
                CodeSynthesizer::expected_outputs(&build.graph),
                cancel,
            )
            .await?;

        let result = RunResult::new(
            request.id(),
            spec,
            build.graph,
            build.omitted,
            outcome.attempts,
            outcome.status,
            started_at,
        );
        info!(status = ?result.status, attempts = result.attempts.len(), "Run finished");
        Ok(result)
    }

    /// Handles of the graph's datasets; unresolvable ones load by name
    async fn resolve_handles(&self, graph: &WorkflowGraph) -> Vec<DatasetHandle> {
        let Some(data) = &self.data else {
            return Vec::new();
        };
        let mut handles = Vec::new();
        for dataset in &graph.datasets {
            match data.resolve(&dataset.name).await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(dataset = %dataset.name, error = %e, "No handle for dataset"),
            }
        }
        handles
    }

    /// Documentation of every tool the graph uses
    async fn tool_docs(&self, graph: &WorkflowGraph) -> String {
        let tools: BTreeSet<&str> = graph.nodes.iter().map(|n| n.tool.as_str()).collect();
        let mut docs = Vec::new();
        for name in tools {
            if let Some(tool) = self.catalog.get(name).await {
                docs.push(tool.documentation());
            }
        }
        docs.join("\n")
    }
}
