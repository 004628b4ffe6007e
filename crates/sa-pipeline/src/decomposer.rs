//! Task Decomposer
//!
//! Three backend stages run before tool selection:
//! - naming: a short slug for artifact names (fast backend, never fatal)
//! - data overview: narrows the data context to what the request needs
//! - decomposition: the ordered list of Operations, retried once with a
//!   corrective prompt when the reply is malformed

use sa_core::task::slugify;
use sa_core::{DataContext, Error, Request, Result, TaskSpec};
use sa_llm::{BackendError, BackendHandle, BackendRouter, ChatMessage, Stage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{call_stage, CallOutcome};
use crate::parsing::{parse_reply, DataOverviewReply, DecompositionReply};
use crate::prompts;

/// Maximum length of task names
pub const TASK_NAME_MAX: usize = 40;

pub struct TaskDecomposer {
    naming: BackendHandle,
    overview: BackendHandle,
    decomposition: BackendHandle,
}

impl TaskDecomposer {
    /// Resolve the three stage handles for `backend`
    pub fn new(router: &BackendRouter, backend: &str) -> Result<Self> {
        Ok(Self {
            naming: router.resolve(Stage::Naming, backend)?,
            overview: router.resolve(Stage::DataOverview, backend)?,
            decomposition: router.resolve(Stage::Decomposition, backend)?,
        })
    }

    /// Task name slug, falling back to a slug of the goal
    pub async fn name_task(&self, goal: &str, cancel: &CancellationToken) -> Result<String> {
        let fallback = slugify(goal, TASK_NAME_MAX);
        match call_stage(&self.naming, prompts::naming_messages(goal), cancel).await {
            CallOutcome::Cancelled => Err(Error::Cancelled("task naming".into())),
            CallOutcome::Failed(e) => {
                warn!(error = %e, fallback = %fallback, "Task naming failed, using goal slug");
                Ok(fallback)
            }
            CallOutcome::Reply(reply) => {
                let line = reply
                    .lines()
                    .map(|l| l.trim().trim_matches(['`', '"', '\'']))
                    .find(|l| !l.is_empty())
                    .unwrap_or_default();
                if line.is_empty() {
                    return Ok(fallback);
                }
                let name = slugify(line, TASK_NAME_MAX);
                debug!(name = %name, "Task named");
                Ok(name)
            }
        }
    }

    /// Data context narrowed to the datasets the request needs
    ///
    /// Unknown names are ignored. An empty or failed reply keeps the full
    /// context.
    pub async fn overview(
        &self,
        goal: &str,
        data: &DataContext,
        cancel: &CancellationToken,
    ) -> Result<DataContext> {
        if data.datasets.len() <= 1 {
            return Ok(data.clone());
        }
        let messages = prompts::data_overview_messages(goal, data);
        let reply = match call_stage(&self.overview, messages, cancel).await {
            CallOutcome::Cancelled => return Err(Error::Cancelled("data overview".into())),
            CallOutcome::Failed(e) => {
                warn!(error = %e, "Data overview failed, keeping full data context");
                return Ok(data.clone());
            }
            CallOutcome::Reply(reply) => reply,
        };

        match parse_reply::<DataOverviewReply>(&reply) {
            Ok(parsed) => {
                let narrowed = data.retain_named(&parsed.datasets);
                if narrowed.is_empty() {
                    warn!("Data overview named no known dataset, keeping full data context");
                    Ok(data.clone())
                } else {
                    info!(
                        kept = narrowed.datasets.len(),
                        available = data.datasets.len(),
                        "Narrowed data context"
                    );
                    Ok(narrowed)
                }
            }
            Err(e) => {
                warn!(error = %e, "Unusable data overview reply, keeping full data context");
                Ok(data.clone())
            }
        }
    }

    /// Decompose a request into a validated TaskSpec
    pub async fn decompose(
        &self,
        request: &Request,
        data: &DataContext,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskSpec> {
        let mut messages = prompts::decomposition_messages(request.goal(), data);
        let mut last_error = String::new();

        for round in 0..2 {
            let reply = match call_stage(&self.decomposition, messages.clone(), cancel).await {
                CallOutcome::Cancelled => return Err(Error::Cancelled("decomposition".into())),
                CallOutcome::Failed(e) => return Err(decomposition_backend_error(e)),
                CallOutcome::Reply(reply) => reply,
            };

            let parsed = parse_reply::<DecompositionReply>(&reply)
                .map_err(|e| e.to_string())
                .and_then(|r| r.into_task_spec(name).map_err(|e| e.to_string()));

            match parsed {
                Ok(spec) => {
                    info!(task = %spec.name, operations = spec.len(), round, "Task decomposed");
                    return Ok(spec);
                }
                Err(e) => {
                    warn!(round, error = %e, "Rejected decomposition reply");
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(prompts::correction_message(&e));
                    last_error = e;
                }
            }
        }

        Err(Error::decomposition(format!(
            "no valid decomposition after retry: {}",
            last_error
        )))
    }
}

fn decomposition_backend_error(e: BackendError) -> Error {
    match e {
        BackendError::Authentication(_)
        | BackendError::RateLimited(_)
        | BackendError::Timeout(_) => e.into(),
        other => Error::decomposition(format!("decomposition backend failed: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{router, QueueBackend};
    use sa_core::{DataKind, DatasetSummary};

    const GOOD: &str = r#"{"summary": "Buffer points by 100 m", "operations": [
        {"id": 1, "label": "Buffer", "category": "transform"}]}"#;

    fn data() -> DataContext {
        DataContext::new(vec![
            DatasetSummary::new("points", DataKind::Vector),
            DatasetSummary::new("dem", DataKind::Raster),
        ])
    }

    #[tokio::test]
    async fn test_name_task_slugifies_reply() {
        let backend = QueueBackend::replies(&["`Buffer Points`\n"]);
        let decomposer = TaskDecomposer::new(&router(backend), "gpt-4o").unwrap();
        let name = decomposer.name_task("buffer", &CancellationToken::new()).await.unwrap();
        assert_eq!(name, "buffer_points");
    }

    #[tokio::test]
    async fn test_name_task_falls_back_to_goal() {
        let backend = QueueBackend::new(vec![Err(BackendError::Transport("down".into()))]);
        let decomposer = TaskDecomposer::new(&router(backend), "gpt-4o").unwrap();
        let name = decomposer
            .name_task("Count schools per district!", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(name, "count_schools_per_district");
    }

    #[tokio::test]
    async fn test_overview_narrows_and_ignores_unknown() {
        let backend = QueueBackend::replies(&[r#"{"datasets": ["dem", "roads"]}"#]);
        let decomposer = TaskDecomposer::new(&router(backend), "gpt-4o").unwrap();
        let narrowed = decomposer
            .overview("slope of the dem", &data(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(narrowed.datasets.len(), 1);
        assert_eq!(narrowed.datasets[0].name, "dem");
    }

    #[tokio::test]
    async fn test_overview_keeps_context_on_empty_reply() {
        let backend = QueueBackend::replies(&[r#"{"datasets": []}"#]);
        let decomposer = TaskDecomposer::new(&router(backend), "gpt-4o").unwrap();
        let ctx = decomposer.overview("x", &data(), &CancellationToken::new()).await.unwrap();
        assert_eq!(ctx, data());
    }

    #[tokio::test]
    async fn test_decompose_retries_with_correction() {
        let backend = QueueBackend::replies(&[
            r#"{"summary": "s", "operations": [{"id": 1, "label": "a", "category": "compute", "depends_on": [3]}]}"#,
            GOOD,
        ]);
        let decomposer = TaskDecomposer::new(&router(backend.clone()), "gpt-4o").unwrap();
        let request = Request::new("buffer points by 100 m", data());
        let spec = decomposer
            .decompose(&request, request.data(), "buffer_points", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(spec.name, "buffer_points");
        assert_eq!(spec.len(), 1);
        assert_eq!(backend.calls(), 2);
        assert!(backend.prompt(1).contains("not defined before it"));
    }

    #[tokio::test]
    async fn test_decompose_fails_after_second_bad_reply() {
        let backend = QueueBackend::replies(&["no json", "still no json"]);
        let decomposer = TaskDecomposer::new(&router(backend.clone()), "gpt-4o").unwrap();
        let request = Request::new("do something", data());
        let err = decomposer
            .decompose(&request, request.data(), "t", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decomposition(_)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_decompose_cancelled() {
        let backend = QueueBackend::replies(&[GOOD]);
        let decomposer = TaskDecomposer::new(&router(backend.clone()), "gpt-4o").unwrap();
        let request = Request::new("x", data());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = decomposer.decompose(&request, request.data(), "t", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(backend.calls(), 0);
    }
}
