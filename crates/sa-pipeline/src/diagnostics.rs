//! Structured diagnostics from Python tracebacks
//!
//! The failing line is taken from the last traceback frame inside the
//! executed script, and is attributed to the workflow node whose
//! `# @node` marker is the nearest one above it.

use lazy_static::lazy_static;
use regex::Regex;
use sa_core::Diagnostic;

use crate::synthesizer::NODE_MARKER;

lazy_static! {
    static ref FRAME: Regex = Regex::new(r#"File "([^"]+)", line (\d+)"#).unwrap();
    static ref EXCEPTION: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)(?::\s?(.*))?$").unwrap();
}

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Node id owning script line `line` (1-based)
pub fn node_at_line(script: &str, line: u32) -> Option<String> {
    script
        .lines()
        .take(line as usize)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|l| l.trim_start().strip_prefix(NODE_MARKER))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Line of the deepest frame inside `script_name`
fn script_line(stderr: &str, script_name: &str) -> Option<u32> {
    FRAME
        .captures_iter(stderr)
        .filter(|c| {
            c.get(1)
                .is_some_and(|path| path.as_str().ends_with(script_name))
        })
        .filter_map(|c| c.get(2).and_then(|n| n.as_str().parse().ok()))
        .last()
}

/// Exception type and message from the last line of a traceback
fn exception_line(stderr: &str) -> Option<(String, String)> {
    let tail = match stderr.rfind(TRACEBACK_HEADER) {
        Some(pos) => &stderr[pos..],
        None => stderr,
    };
    let last = tail.lines().rev().map(str::trim_end).find(|l| !l.trim().is_empty())?;
    if last.starts_with(' ') {
        return None;
    }
    let caps = EXCEPTION.captures(last)?;
    let exc = caps.get(1)?.as_str();
    let looks_like_exception = exc
        .rsplit('.')
        .next()
        .is_some_and(|name| name.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
    if !looks_like_exception {
        return None;
    }
    let message = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
    Some((exc.to_string(), message))
}

/// Diagnostic for a process that exited with an error
pub fn parse_failure(
    stderr: &str,
    script: &str,
    script_name: &str,
    exit_code: Option<i32>,
) -> Diagnostic {
    let line = script_line(stderr, script_name);
    let node_id = line.and_then(|l| node_at_line(script, l));

    let (exception_type, message) = match exception_line(stderr) {
        Some((exc, msg)) => (Some(exc), msg),
        None => {
            let last = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string);
            let status = match exit_code {
                Some(code) => format!("process exited with status {}", code),
                None => "process terminated by signal".to_string(),
            };
            (None, last.unwrap_or(status))
        }
    };

    Diagnostic {
        exception_type,
        message,
        line,
        node_id,
        raw: stderr.to_string(),
    }
}

/// Diagnostic for a clean exit that did not save every terminal output
pub fn missing_outputs(missing: &[String], stderr: &str) -> Diagnostic {
    Diagnostic {
        exception_type: Some("MissingOutput".to_string()),
        message: format!("terminal outputs were not saved: {}", missing.join(", ")),
        line: None,
        node_id: None,
        raw: stderr.to_string(),
    }
}
