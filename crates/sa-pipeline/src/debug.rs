//! Debug Loop
//!
//! Explicit state machine over the attempt chain:
//!
//! ```text
//! Executing(a) --success--------------------> Done(success)
//! Executing(a) --failure, a <  max--repair--> Executing(a + 1)
//! Executing(a) --failure, a == max----------> Done(failure)
//! ```
//!
//! Each transition out of `Executing` appends exactly one attempt, so a run
//! holds at most `max + 1` attempts. A repair reply without code and a
//! transient backend failure both re-run the prior script. An
//! authentication failure ends the loop. A sandbox that cannot run an
//! attempt at all records it as failed and ends the loop.

use sa_core::{AttemptChain, Diagnostic, Error, ExecutionAttempt, Result, RunStatus};
use sa_llm::{BackendError, BackendHandle, BackendRouter, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{call_stage, CallOutcome};
use crate::hints::{hints_for, render_hints};
use crate::parsing::extract_code;
use crate::prompts::{self, RepairBrief};
use crate::sandbox::{ExecutionContext, ExecutionSandbox};

#[derive(Debug)]
enum LoopState {
    Executing { attempt: u32, script: String },
    Done(RunStatus),
}

/// Outcome of the repair stage for one failed attempt
#[derive(Debug)]
enum Repair {
    Revised(String),
    /// Re-run the prior script
    Unchanged,
    Abort,
    Cancelled,
}

/// Attempts of a run and its terminal status
#[derive(Debug)]
pub struct DebugOutcome {
    pub attempts: AttemptChain,
    pub status: RunStatus,
}

pub struct DebugLoop {
    sandbox: Arc<dyn ExecutionSandbox>,
    handle: BackendHandle,
    max_attempts: u32,
    brief: RepairBrief,
}

impl DebugLoop {
    pub fn new(
        sandbox: Arc<dyn ExecutionSandbox>,
        router: &BackendRouter,
        backend: &str,
        max_attempts: u32,
    ) -> Result<Self> {
        Ok(Self {
            sandbox,
            handle: router.resolve(Stage::Debugging, backend)?,
            max_attempts,
            brief: RepairBrief::default(),
        })
    }

    /// Context shown to the repair stage
    pub fn with_brief(mut self, brief: RepairBrief) -> Self {
        self.brief = brief;
        self
    }

    /// Execute `script`, repairing failures until success or the budget runs out
    pub async fn run(
        &self,
        run_id: Uuid,
        script: String,
        expected_outputs: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<DebugOutcome> {
        let mut attempts = AttemptChain::new();
        let mut state = LoopState::Executing { attempt: 0, script };

        loop {
            state = match state {
                LoopState::Done(status) => {
                    info!(run_id = %run_id, status = ?status, attempts = attempts.len(), "Debug loop finished");
                    return Ok(DebugOutcome { attempts, status });
                }
                LoopState::Executing { attempt, script } => {
                    if cancel.is_cancelled() {
                        LoopState::Done(RunStatus::Cancelled)
                    } else {
                        let ctx = ExecutionContext {
                            run_id,
                            index: attempt,
                            expected_outputs: expected_outputs.clone(),
                            cancel: cancel.clone(),
                        };
                        let executed = self.sandbox.execute(&script, &ctx).await;
                        match executed {
                            Err(Error::Cancelled(_)) => LoopState::Done(RunStatus::Cancelled),
                            Err(e) => {
                                warn!(run_id = %run_id, attempt, error = %e, "Sandbox could not run attempt");
                                let diagnostic = Diagnostic::message(e.to_string(), "");
                                let failed =
                                    ExecutionAttempt::begin(attempt, script, PathBuf::new())
                                        .fail(diagnostic, String::new(), vec![]);
                                attempts.push(failed)?;
                                LoopState::Done(RunStatus::Failure)
                            }
                            Ok(result) => {
                                let success = result.is_success();
                                let diagnostic = result.diagnostic.clone();
                                attempts.push(result)?;

                                if success {
                                    info!(run_id = %run_id, attempt, "Attempt succeeded");
                                    LoopState::Done(RunStatus::Success)
                                } else if attempt >= self.max_attempts {
                                    warn!(run_id = %run_id, attempt, "Attempt failed, repair budget exhausted");
                                    LoopState::Done(RunStatus::Failure)
                                } else {
                                    let diagnostic = diagnostic.unwrap_or_else(|| {
                                        Diagnostic::message("execution failed without diagnostic", "")
                                    });
                                    warn!(run_id = %run_id, attempt, error = %diagnostic.headline(), "Attempt failed, requesting repair");
                                    match self.repair(&script, &diagnostic, cancel).await {
                                        Repair::Revised(revised) => LoopState::Executing {
                                            attempt: attempt + 1,
                                            script: revised,
                                        },
                                        Repair::Unchanged => LoopState::Executing {
                                            attempt: attempt + 1,
                                            script,
                                        },
                                        Repair::Abort => LoopState::Done(RunStatus::Failure),
                                        Repair::Cancelled => LoopState::Done(RunStatus::Cancelled),
                                    }
                                }
                            }
                        }
                    }
                }
            };
        }
    }

    async fn repair(
        &self,
        script: &str,
        diagnostic: &Diagnostic,
        cancel: &CancellationToken,
    ) -> Repair {
        let hints = render_hints(&hints_for(diagnostic));
        let messages = prompts::debug_messages(&self.brief, script, &diagnostic.render(), &hints);

        match call_stage(&self.handle, messages, cancel).await {
            CallOutcome::Cancelled => Repair::Cancelled,
            CallOutcome::Failed(BackendError::Authentication(msg)) => {
                warn!(
                    backend = %self.handle.backend_name,
                    error = %msg,
                    "Repair backend rejected credentials"
                );
                Repair::Abort
            }
            CallOutcome::Failed(e) => {
                warn!(error = %e, transient = e.is_transient(), "Repair call failed, re-running prior script");
                Repair::Unchanged
            }
            CallOutcome::Reply(reply) => match extract_code(&reply) {
                Some(code) => Repair::Revised(code),
                None => {
                    warn!("Repair reply contained no code block, re-running prior script");
                    Repair::Unchanged
                }
            },
        }
    }
}
