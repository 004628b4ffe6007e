//! Cancellable backend calls shared by the stages

use sa_llm::{BackendError, BackendHandle, ChatMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one stage call
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Reply(String),
    Failed(BackendError),
    Cancelled,
}

/// Call the stage backend unless `cancel` fires first
pub(crate) async fn call_stage(
    handle: &BackendHandle,
    messages: Vec<ChatMessage>,
    cancel: &CancellationToken,
) -> CallOutcome {
    if cancel.is_cancelled() {
        return CallOutcome::Cancelled;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => CallOutcome::Cancelled,
        result = handle.complete(messages) => match result {
            Ok(response) => {
                debug!(stage = %handle.stage, backend = %handle.backend_name, chars = response.content.len(), "Backend replied");
                CallOutcome::Reply(response.content)
            }
            Err(e) => {
                warn!(stage = %handle.stage, backend = %handle.backend_name, error = %e, "Backend call failed");
                CallOutcome::Failed(e)
            }
        },
    }
}
