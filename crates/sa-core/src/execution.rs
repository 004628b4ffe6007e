//! Execution attempts and the append-only attempt chain
//!
//! Attempts form a linear chain per run: attempt n+1 is derived from
//! attempt n's script and diagnostic. Once an attempt is pushed onto the
//! chain it can no longer be modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::task::OperationId;

/// Outcome of one sandbox execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RuntimeError,
    Timeout,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// Structured diagnostic captured from a failed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Exception class, e.g. `KeyError`
    pub exception_type: Option<String>,
    pub message: String,
    /// 1-based line in the executed script
    pub line: Option<u32>,
    /// Workflow node the failing line belongs to
    pub node_id: Option<String>,
    /// Raw diagnostic text as captured
    pub raw: String,
}

impl Diagnostic {
    /// Diagnostic with only a message and raw text
    pub fn message(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            exception_type: None,
            message: message.into(),
            line: None,
            node_id: None,
            raw: raw.into(),
        }
    }

    /// One-line headline, e.g. `KeyError: 'pop' (line 14, node n2_native_fieldcalculator)`
    pub fn headline(&self) -> String {
        let mut out = match &self.exception_type {
            Some(exc) => format!("{}: {}", exc, self.message),
            None => self.message.clone(),
        };
        match (self.line, &self.node_id) {
            (Some(line), Some(node)) => out.push_str(&format!(" (line {}, node {})", line, node)),
            (Some(line), None) => out.push_str(&format!(" (line {})", line)),
            (None, Some(node)) => out.push_str(&format!(" (node {})", node)),
            (None, None) => {}
        }
        out
    }

    /// Full text handed to the repair prompt
    pub fn render(&self) -> String {
        if self.raw.trim().is_empty() {
            self.headline()
        } else {
            format!("{}\n\n{}", self.headline(), self.raw.trim_end())
        }
    }
}

/// One run of synthesized code plus its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 0-based attempt index
    pub index: u32,
    pub script: String,
    pub outcome: AttemptOutcome,
    pub diagnostic: Option<Diagnostic>,
    /// Captured standard output (truncated if large)
    pub stdout: String,
    /// Files produced in the attempt's output namespace
    pub artifacts: Vec<PathBuf>,
    /// Isolated output namespace of this attempt
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

const MAX_STDOUT: usize = 20_000;

impl ExecutionAttempt {
    /// Start a new attempt; the outcome is filled in by one of the finishers
    pub fn begin(index: u32, script: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            script: script.into(),
            outcome: AttemptOutcome::RuntimeError,
            diagnostic: None,
            stdout: String::new(),
            artifacts: Vec::new(),
            output_dir: output_dir.into(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Mark as succeeded
    pub fn succeed(mut self, stdout: String, artifacts: Vec<PathBuf>) -> Self {
        self.finish();
        self.outcome = AttemptOutcome::Success;
        self.stdout = truncate_string(&stdout, MAX_STDOUT);
        self.artifacts = artifacts;
        self
    }

    /// Mark as failed with a runtime error
    pub fn fail(mut self, diagnostic: Diagnostic, stdout: String, artifacts: Vec<PathBuf>) -> Self {
        self.finish();
        self.outcome = AttemptOutcome::RuntimeError;
        self.diagnostic = Some(diagnostic);
        self.stdout = truncate_string(&stdout, MAX_STDOUT);
        self.artifacts = artifacts;
        self
    }

    /// Mark as timed out
    pub fn time_out(mut self, limit_ms: u64, stdout: String) -> Self {
        self.finish();
        self.outcome = AttemptOutcome::Timeout;
        let message = format!("Execution timed out after {}ms", limit_ms);
        self.diagnostic = Some(Diagnostic {
            exception_type: Some("Timeout".to_string()),
            message: message.clone(),
            line: None,
            node_id: None,
            raw: message,
        });
        self.stdout = truncate_string(&stdout, MAX_STDOUT);
        self
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Truncate string to max length on a char boundary
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &s[..end])
}

/// Append-only chain of attempts owned by one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptChain {
    attempts: Vec<ExecutionAttempt>,
}

impl AttemptChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next attempt. Its index must equal the current length.
    pub fn push(&mut self, attempt: ExecutionAttempt) -> Result<()> {
        let expected = self.attempts.len() as u32;
        if attempt.index != expected {
            return Err(Error::internal(format!(
                "attempt index {} appended where {} was expected",
                attempt.index, expected
            )));
        }
        if self.attempts.last().is_some_and(|a| a.is_success()) {
            return Err(Error::internal(
                "attempt appended after a successful attempt",
            ));
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&ExecutionAttempt> {
        self.attempts.last()
    }

    pub fn as_slice(&self) -> &[ExecutionAttempt] {
        &self.attempts
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionAttempt> {
        self.attempts.iter()
    }

    /// Diagnostic of the most recent failed attempt
    pub fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.attempts.iter().rev().find_map(|a| a.diagnostic.as_ref())
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

/// Operation that could not be bound to any tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedOperation {
    pub operation_id: OperationId,
    pub label: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_enforces_order() {
        let mut chain = AttemptChain::new();
        let first = ExecutionAttempt::begin(0, "print(1)", "/tmp/a0")
            .fail(Diagnostic::message("boom", "boom"), String::new(), vec![]);
        chain.push(first).unwrap();

        let skipped = ExecutionAttempt::begin(2, "print(2)", "/tmp/a2");
        assert!(chain.push(skipped).is_err());

        let second = ExecutionAttempt::begin(1, "print(2)", "/tmp/a1").succeed("2\n".into(), vec![]);
        chain.push(second).unwrap();

        let after_success = ExecutionAttempt::begin(2, "print(3)", "/tmp/a2");
        assert!(chain.push(after_success).is_err());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_diagnostic().unwrap().message, "boom");
    }

    #[test]
    fn test_timeout_diagnostic() {
        let attempt = ExecutionAttempt::begin(0, "", "/tmp/x").time_out(1500, String::new());
        assert_eq!(attempt.outcome, AttemptOutcome::Timeout);
        assert_eq!(
            attempt.diagnostic.unwrap().headline(),
            "Timeout: Execution timed out after 1500ms"
        );
    }

    #[test]
    fn test_headline_with_attribution() {
        let diag = Diagnostic {
            exception_type: Some("KeyError".to_string()),
            message: "'pop'".to_string(),
            line: Some(14),
            node_id: Some("n2_native_fieldcalculator".to_string()),
            raw: "Traceback ...".to_string(),
        };
        assert_eq!(
            diag.headline(),
            "KeyError: 'pop' (line 14, node n2_native_fieldcalculator)"
        );
        assert!(diag.render().ends_with("Traceback ..."));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "é".repeat(10);
        let t = truncate_string(&s, 5);
        assert!(t.ends_with("... (truncated)"));
    }
}
