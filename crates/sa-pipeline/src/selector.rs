//! Tool Selector
//!
//! For each Operation:
//! 1. Candidates: similarity hits (when retrieval is on and the catalog has
//!    an index) followed by category matches in name order, deduplicated and
//!    truncated to the candidate limit
//! 2. No candidates: unresolved, no backend call
//! 3. Otherwise the backend picks tools, parameters and input sources; names
//!    outside the candidate set and sources that cannot be wired are dropped
//! 4. A malformed reply is retried once, then the operation is unresolved

use sa_core::{DataContext, Error, Operation, OperationId, Result, TaskSpec};
use sa_llm::{BackendError, BackendHandle, BackendRouter, ChatMessage, Stage};
use sa_tools::{BoundTool, InputSource, OperationCatalog, ToolBinding, ToolSpec};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{call_stage, CallOutcome};
use crate::parsing::{parse_reply, SelectedTool, SelectionReply};
use crate::prompts;

pub struct ToolSelector {
    catalog: Arc<dyn OperationCatalog>,
    handle: BackendHandle,
    retrieval: bool,
    candidate_limit: usize,
}

impl ToolSelector {
    pub fn new(
        catalog: Arc<dyn OperationCatalog>,
        router: &BackendRouter,
        backend: &str,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            handle: router.resolve(Stage::ToolSelection, backend)?,
            retrieval: true,
            candidate_limit: 8,
        })
    }

    pub fn with_retrieval(mut self, enabled: bool) -> Self {
        self.retrieval = enabled;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    /// Ranked candidate tools for one operation
    pub async fn candidates(&self, operation: &Operation) -> Vec<ToolSpec> {
        let mut ranked: Vec<ToolSpec> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if self.retrieval {
            if let Some(hits) = self
                .catalog
                .search(&operation.query_text(), self.candidate_limit)
                .await
            {
                for hit in hits {
                    if seen.contains(&hit.name) {
                        continue;
                    }
                    if let Some(tool) = self.catalog.get(&hit.name).await {
                        seen.insert(hit.name);
                        ranked.push(tool);
                    }
                }
            }
        }

        for tool in self.catalog.by_category(operation.category).await {
            if seen.insert(tool.name.clone()) {
                ranked.push(tool);
            }
        }

        ranked.truncate(self.candidate_limit);
        ranked
    }

    /// Bind every operation of `spec`, in order
    pub async fn select(
        &self,
        spec: &TaskSpec,
        data: &DataContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolBinding>> {
        let mut bindings: Vec<ToolBinding> = Vec::with_capacity(spec.len());
        for operation in &spec.operations {
            let binding = self
                .select_one(spec, operation, data, &bindings, cancel)
                .await?;
            if binding.is_resolved() {
                let tools: Vec<&str> = binding.tools.iter().map(|t| t.tool.name.as_str()).collect();
                info!(operation = operation.id, tools = ?tools, "Operation bound");
            } else {
                warn!(operation = operation.id, reason = %binding.reason(), "Operation unresolved");
            }
            bindings.push(binding);
        }
        Ok(bindings)
    }

    async fn select_one(
        &self,
        spec: &TaskSpec,
        operation: &Operation,
        data: &DataContext,
        earlier: &[ToolBinding],
        cancel: &CancellationToken,
    ) -> Result<ToolBinding> {
        let candidates = self.candidates(operation).await;
        if candidates.is_empty() {
            return Ok(ToolBinding::unresolved(
                operation.clone(),
                "no candidate tools in catalog",
            ));
        }
        debug!(
            operation = operation.id,
            candidates = candidates.len(),
            "Selecting tools"
        );

        let upstream: Vec<(Operation, Vec<String>)> = earlier
            .iter()
            .map(|b| {
                let outputs = b
                    .primary()
                    .map(|t| t.tool.outputs.iter().map(|p| p.name.clone()).collect())
                    .unwrap_or_default();
                (b.operation.clone(), outputs)
            })
            .collect();

        let mut messages =
            prompts::selection_messages(spec, operation, &candidates, data, &upstream);
        let mut last_error = String::new();

        for round in 0..2 {
            let reply = match call_stage(&self.handle, messages.clone(), cancel).await {
                CallOutcome::Cancelled => return Err(Error::Cancelled("tool selection".into())),
                CallOutcome::Failed(e @ BackendError::Authentication(_)) => return Err(e.into()),
                CallOutcome::Failed(e) => {
                    return Ok(ToolBinding::unresolved(
                        operation.clone(),
                        format!("tool selection backend failed: {}", e),
                    ))
                }
                CallOutcome::Reply(reply) => reply,
            };

            match parse_reply::<SelectionReply>(&reply) {
                Ok(parsed) => {
                    let tools = bind_selected(parsed.tools, &candidates, operation, data, earlier);
                    if tools.is_empty() {
                        return Ok(ToolBinding::unresolved(
                            operation.clone(),
                            "backend selected no candidate tool",
                        ));
                    }
                    return Ok(ToolBinding::resolved(operation.clone(), tools));
                }
                Err(e) => {
                    warn!(operation = operation.id, round, error = %e, "Rejected selection reply");
                    last_error = e.to_string();
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(prompts::correction_message(&last_error));
                }
            }
        }

        Ok(ToolBinding::unresolved(operation.clone(), last_error))
    }
}

/// Bind the backend's picks against the candidate set
fn bind_selected(
    selected: Vec<SelectedTool>,
    candidates: &[ToolSpec],
    operation: &Operation,
    data: &DataContext,
    earlier: &[ToolBinding],
) -> Vec<BoundTool> {
    let mut tools: Vec<BoundTool> = Vec::new();
    for pick in selected {
        let Some(spec) = candidates.iter().find(|c| c.name == pick.name) else {
            warn!(operation = operation.id, tool = %pick.name, "Dropping tool outside candidate set");
            continue;
        };
        if tools.iter().any(|t| t.tool.name == spec.name) {
            continue;
        }

        let mut bound = BoundTool::new(spec.clone());
        for (name, value) in pick.parameters {
            if spec.parameter(&name).is_some() {
                bound = bound.with_parameter(&name, value);
            } else {
                debug!(tool = %spec.name, parameter = %name, "Ignoring undeclared parameter");
            }
        }
        for (port, source) in pick.inputs {
            if spec.input(&port).is_none() {
                debug!(tool = %spec.name, port = %port, "Ignoring undeclared input");
                continue;
            }
            if source_is_wirable(&source, operation.id, data, earlier) {
                bound = bound.with_input(&port, source);
            } else {
                warn!(tool = %spec.name, port = %port, source = ?source, "Dropping unusable input source");
            }
        }
        tools.push(bound);
    }
    tools
}

/// A source is usable if it names a known dataset or an output of an
/// earlier operation. Sources on unresolved operations are kept so the
/// graph builder can report the dependency.
fn source_is_wirable(
    source: &InputSource,
    current: OperationId,
    data: &DataContext,
    earlier: &[ToolBinding],
) -> bool {
    match source {
        InputSource::Dataset { name } => data.get(name).is_some(),
        InputSource::Upstream { operation, output } => {
            if *operation == current {
                return false;
            }
            match earlier.iter().find(|b| b.operation.id == *operation) {
                None => false,
                Some(binding) => match binding.primary() {
                    None => true,
                    Some(tool) => tool.tool.output(output).is_some(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{router, QueueBackend};
    use sa_core::{DataKind, DatasetSummary, OperationCategory};
    use sa_tools::{InMemoryCatalog, ParameterSpec};

    fn tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("native:buffer", "Buffer", OperationCategory::Transform)
                .with_description("Buffer features by a fixed distance")
                .with_input("INPUT", DataKind::Vector)
                .with_parameter(ParameterSpec::required("DISTANCE", "number"))
                .with_output("OUTPUT", DataKind::Vector),
            ToolSpec::new("native:centroids", "Centroids", OperationCategory::Transform)
                .with_input("INPUT", DataKind::Vector)
                .with_output("OUTPUT", DataKind::Vector),
            ToolSpec::new("gdal:slope", "Slope", OperationCategory::Compute)
                .with_description("Slope of a digital elevation model")
                .with_input("INPUT", DataKind::Raster)
                .with_output("OUTPUT", DataKind::Raster),
        ]
    }

    async fn catalog() -> Arc<dyn OperationCatalog> {
        Arc::new(InMemoryCatalog::from_tools(tools()).await.unwrap())
    }

    fn data() -> DataContext {
        DataContext::new(vec![DatasetSummary::new("points", DataKind::Vector)])
    }

    fn spec(ops: Vec<Operation>) -> TaskSpec {
        TaskSpec::new("t", "summary", ops).unwrap()
    }

    #[tokio::test]
    async fn test_candidates_hits_then_category() {
        let backend = QueueBackend::replies(&[]);
        let selector = ToolSelector::new(catalog().await, &router(backend), "gpt-4o").unwrap();
        let op = Operation::new(1, "buffer points", OperationCategory::Transform)
            .with_description("fixed distance buffer");
        let names: Vec<String> = selector.candidates(&op).await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["native:buffer", "native:centroids"]);

        let again: Vec<String> = selector.candidates(&op).await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, again);

        let limited = ToolSelector::new(catalog().await, &router(QueueBackend::replies(&[])), "gpt-4o")
            .unwrap()
            .with_candidate_limit(1);
        assert_eq!(limited.candidates(&op).await.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_disabled_uses_category_only() {
        let selector = ToolSelector::new(catalog().await, &router(QueueBackend::replies(&[])), "gpt-4o")
            .unwrap()
            .with_retrieval(false);
        let op = Operation::new(1, "slope of elevation", OperationCategory::Transform);
        let names: Vec<String> = selector.candidates(&op).await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["native:buffer", "native:centroids"]);
    }

    #[tokio::test]
    async fn test_no_candidates_skips_backend() {
        let backend = QueueBackend::replies(&[]);
        let empty: Arc<dyn OperationCatalog> = Arc::new(InMemoryCatalog::new());
        let selector = ToolSelector::new(empty, &router(backend.clone()), "gpt-4o").unwrap();
        let spec = spec(vec![Operation::new(1, "interpolate", OperationCategory::Other)]);
        let bindings = selector.select(&spec, &data(), &CancellationToken::new()).await.unwrap();
        assert!(!bindings[0].is_resolved());
        assert_eq!(bindings[0].reason(), "no candidate tools in catalog");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_select_binds_parameters_and_drops_unknown() {
        let backend = QueueBackend::replies(&[r#"{"tools": [
            {"name": "qgis:imaginary"},
            {"name": "native:buffer", "parameters": {"DISTANCE": 100, "COLOR": "red"},
             "inputs": {"INPUT": {"source": "dataset", "name": "points"}}}
        ]}"#]);
        let selector = ToolSelector::new(catalog().await, &router(backend), "gpt-4o").unwrap();
        let spec = spec(vec![Operation::new(1, "buffer points by 100 m", OperationCategory::Transform)]);
        let bindings = selector.select(&spec, &data(), &CancellationToken::new()).await.unwrap();
        let bound = bindings[0].primary().unwrap();
        assert_eq!(bindings[0].tools.len(), 1);
        assert_eq!(bound.tool.name, "native:buffer");
        assert_eq!(bound.parameters["DISTANCE"], serde_json::json!(100));
        assert!(!bound.parameters.contains_key("COLOR"));
        assert_eq!(bound.inputs["INPUT"], InputSource::dataset("points"));
    }

    #[tokio::test]
    async fn test_unknown_dataset_source_dropped() {
        let backend = QueueBackend::replies(&[r#"{"tools": [{"name": "native:buffer",
            "inputs": {"INPUT": {"source": "dataset", "name": "roads"}}}]}"#]);
        let selector = ToolSelector::new(catalog().await, &router(backend), "gpt-4o").unwrap();
        let spec = spec(vec![Operation::new(1, "buffer", OperationCategory::Transform)]);
        let bindings = selector.select(&spec, &data(), &CancellationToken::new()).await.unwrap();
        assert!(bindings[0].primary().unwrap().inputs.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_twice_is_unresolved() {
        let backend = QueueBackend::replies(&["buffer is best", "{\"tools\": 3}"]);
        let selector = ToolSelector::new(catalog().await, &router(backend.clone()), "gpt-4o").unwrap();
        let spec = spec(vec![Operation::new(1, "buffer", OperationCategory::Transform)]);
        let bindings = selector.select(&spec, &data(), &CancellationToken::new()).await.unwrap();
        assert!(!bindings[0].is_resolved());
        assert!(bindings[0].reason().contains("schema"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let backend = QueueBackend::new(vec![Err(BackendError::Authentication("bad key".into()))]);
        let selector = ToolSelector::new(catalog().await, &router(backend), "gpt-4o").unwrap();
        let spec = spec(vec![Operation::new(1, "buffer", OperationCategory::Transform)]);
        let err = selector.select(&spec, &data(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::BackendAuth(_)));
    }
}
