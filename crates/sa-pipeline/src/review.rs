//! Review Stage
//!
//! Optional critique of the synthesized script before its first execution.
//! Routed through the code-generation stage. A reply with a code block
//! replaces the script; any other outcome keeps it.

use sa_core::{DataContext, Error, Result};
use sa_llm::{BackendHandle, BackendRouter, Stage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{call_stage, CallOutcome};
use crate::parsing::extract_code;
use crate::prompts;

pub struct ScriptReviewer {
    handle: BackendHandle,
}

impl ScriptReviewer {
    pub fn new(router: &BackendRouter, backend: &str) -> Result<Self> {
        Ok(Self {
            handle: router.resolve(Stage::CodeGeneration, backend)?,
        })
    }

    /// Reviewed script; only cancellation is an error
    pub async fn review(
        &self,
        summary: &str,
        data: &DataContext,
        tool_docs: &str,
        script: String,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let messages = prompts::review_messages(summary, data, tool_docs, &script);
        match call_stage(&self.handle, messages, cancel).await {
            CallOutcome::Cancelled => Err(Error::Cancelled("review".into())),
            CallOutcome::Failed(e) => {
                warn!(error = %e, "Review failed, keeping synthesized script");
                Ok(script)
            }
            CallOutcome::Reply(reply) => match extract_code(&reply) {
                Some(reviewed) => {
                    if reviewed != script {
                        info!(
                            before = script.lines().count(),
                            after = reviewed.lines().count(),
                            "Review revised script"
                        );
                    }
                    Ok(reviewed)
                }
                None => {
                    warn!("Review reply had no code block, keeping synthesized script");
                    Ok(script)
                }
            },
        }
    }
}
