//! Execution Sandbox
//!
//! Runs a synthesized script in an isolated attempt directory:
//!
//! ```text
//! <workspace>/<run-id>/attempt-<n>/script.py
//! <workspace>/<run-id>/attempt-<n>/outputs/
//! ```
//!
//! `ProcessSandbox` starts the configured interpreter as a child process
//! with a wall-clock timeout. On Unix the child leads its own process
//! group, and the whole group is killed once the attempt ends, so
//! processes the script started do not outlive it. A cancelled attempt's
//! directory is removed.
//! An attempt succeeds on exit status 0 with an artifact saved for every
//! expected terminal output.

use async_trait::async_trait;
use sa_core::{Error, ExecutionAttempt, Result, SandboxSettings};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::diagnostics;
use crate::synthesizer::OUTPUT_DIR_ENV;

/// File name of the script inside an attempt directory
pub const SCRIPT_FILE: &str = "script.py";

/// Directory of a run's artifacts
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
    run_id: Uuid,
}

/// Paths of one prepared attempt
#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub script: PathBuf,
    pub outputs: PathBuf,
}

impl RunWorkspace {
    pub fn new(root: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            root: root.into(),
            run_id,
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(self.run_id.to_string())
    }

    pub fn attempt_dir(&self, index: u32) -> PathBuf {
        self.run_dir().join(format!("attempt-{}", index))
    }

    /// Directory for graph exports
    pub fn export_dir(&self) -> PathBuf {
        self.run_dir().join("graph")
    }

    /// Create the attempt directory and write the script
    pub fn prepare_attempt(&self, index: u32, script: &str) -> Result<AttemptPaths> {
        let dir = self.attempt_dir(index);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        let outputs = dir.join("outputs");
        std::fs::create_dir_all(&outputs)?;
        let script_path = dir.join(SCRIPT_FILE);
        std::fs::write(&script_path, script)?;
        Ok(AttemptPaths {
            dir,
            script: script_path,
            outputs,
        })
    }
}

/// Files below `dir`, sorted by path
pub fn collect_artifacts(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Expected outputs with no artifact; an artifact matches by file stem
pub fn missing_outputs(expected: &[String], artifacts: &[PathBuf]) -> Vec<String> {
    expected
        .iter()
        .filter(|var| {
            !artifacts.iter().any(|a| {
                a.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n == var.as_str() || n.starts_with(&format!("{}.", var)))
            })
        })
        .cloned()
        .collect()
}

/// Per-execution context
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    /// 0-based attempt index
    pub index: u32,
    /// Output variables the script must save
    pub expected_outputs: Vec<String>,
    pub cancel: CancellationToken,
}

/// Runs scripts and reports attempts
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Execute one attempt
    ///
    /// Runtime errors and timeouts are reported as failed attempts.
    /// Cancellation returns `Error::Cancelled`; `Err` otherwise means the
    /// sandbox itself failed.
    async fn execute(&self, script: &str, ctx: &ExecutionContext) -> Result<ExecutionAttempt>;
}

/// Sandbox running a child interpreter process
pub struct ProcessSandbox {
    settings: SandboxSettings,
}

impl ProcessSandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn workspace(&self, run_id: Uuid) -> RunWorkspace {
        RunWorkspace::new(&self.settings.workspace_dir, run_id)
    }
}

#[async_trait]
impl ExecutionSandbox for ProcessSandbox {
    async fn execute(&self, script: &str, ctx: &ExecutionContext) -> Result<ExecutionAttempt> {
        let paths = self.workspace(ctx.run_id).prepare_attempt(ctx.index, script)?;
        let attempt = ExecutionAttempt::begin(ctx.index, script, &paths.outputs);

        // The child runs inside the attempt directory
        let outputs = paths
            .outputs
            .canonicalize()
            .unwrap_or_else(|_| paths.outputs.clone());

        let mut command = Command::new(&self.settings.interpreter);
        command
            .arg(SCRIPT_FILE)
            .current_dir(&paths.dir)
            .env(OUTPUT_DIR_ENV, &outputs)
            .env("SA_RUN_ID", ctx.run_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        info!(
            run_id = %ctx.run_id,
            attempt = ctx.index,
            interpreter = %self.settings.interpreter,
            "Executing script"
        );

        let child = command.spawn().map_err(|e| {
            Error::sandbox(format!("failed to start {}: {}", self.settings.interpreter, e))
        })?;
        let group = child.id();

        let timeout = self.settings.timeout;
        let run = tokio::time::timeout(timeout, child.wait_with_output());

        // Dropping `run` kills the child
        let finished = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = run => Some(result),
        };
        kill_process_group(group);

        let output = match finished {
            None => {
                warn!(run_id = %ctx.run_id, attempt = ctx.index, "Execution cancelled");
                if let Err(e) = std::fs::remove_dir_all(&paths.dir) {
                    warn!(error = %e, dir = %paths.dir.display(), "Failed to remove cancelled attempt");
                }
                return Err(Error::Cancelled(format!("attempt {}", ctx.index)));
            }
            Some(Err(_)) => {
                warn!(run_id = %ctx.run_id, attempt = ctx.index, ?timeout, "Execution timed out");
                return Ok(attempt.time_out(timeout.as_millis() as u64, String::new()));
            }
            Some(Ok(Err(e))) => {
                return Err(Error::sandbox(format!("failed to wait for interpreter: {}", e)))
            }
            Some(Ok(Ok(output))) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let artifacts = collect_artifacts(&paths.outputs);

        if !output.status.success() {
            let diagnostic =
                diagnostics::parse_failure(&stderr, script, SCRIPT_FILE, output.status.code());
            debug!(attempt = ctx.index, error = %diagnostic.headline(), "Script failed");
            return Ok(attempt.fail(diagnostic, stdout, artifacts));
        }

        let missing = missing_outputs(&ctx.expected_outputs, &artifacts);
        if !missing.is_empty() {
            let diagnostic = diagnostics::missing_outputs(&missing, &stderr);
            return Ok(attempt.fail(diagnostic, stdout, artifacts));
        }

        debug!(attempt = ctx.index, artifacts = artifacts.len(), "Script succeeded");
        Ok(attempt.succeed(stdout, artifacts))
    }
}

/// Kill whatever is left of the process group led by `leader`
#[cfg(unix)]
fn kill_process_group(leader: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = leader.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = pid, "Killed leftover attempt processes"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pid, error = %e, "Failed to kill attempt process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: Option<u32>) {}
