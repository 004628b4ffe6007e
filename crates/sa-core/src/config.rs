//! Environment and operator configuration
//!
//! Two layers:
//!
//! - `load_environment()` reads KEY=VALUE lines from the first environment
//!   file found (`$SA_ENV_FILE`, `/etc/spatial-agent/environment`, `.env`)
//!   without overriding variables that are already set.
//! - `AgentSettings::load()` assembles operator settings from built-in
//!   defaults, an optional TOML file and `SA_`-prefixed environment variables
//!   (`SA_BACKEND`, `SA_MAX_ATTEMPTS`, `SA_REVIEW_ENABLED`, ...).
//!
//! Call `load_environment()` early in main(), before `AgentSettings::load()`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::ReasoningEffort;

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/spatial-agent/environment", ".env"];

/// Load environment variables from the first environment file found.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("SA_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for (key, value) in content.lines().filter_map(parse_env_line) {
                if std::env::var(&key).is_err() {
                    std::env::set_var(&key, &value);
                    loaded_count += 1;
                    debug!(key = %key, "Loaded environment variable");
                } else {
                    skipped_count += 1;
                    debug!(key = %key, "Skipped (already set)");
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single environment line into a key-value pair.
///
/// Handles `KEY=VALUE`, `KEY="VALUE"`, `KEY='VALUE'` and `export KEY=VALUE`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get an optional configuration value; empty strings count as unset.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a configuration value with a default.
pub fn get_config(key: &str, default: &str) -> String {
    get_config_opt(key).unwrap_or_else(|| default.to_string())
}

/// Operator settings for one agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Operator-selected backend profile name, e.g. `gpt-5.1`
    pub backend: String,
    /// Reasoning effort for high-reasoning backends
    pub effort: ReasoningEffort,
    /// Debug attempts after the initial execution
    pub max_attempts: u32,
    pub review_enabled: bool,
    /// Use the catalog similarity index when narrowing candidates
    pub retrieval_enabled: bool,
    /// Maximum candidate tools offered per operation
    pub candidate_limit: usize,
    pub backend_timeout_secs: u64,
    pub sandbox_timeout_secs: u64,
    /// Root directory for per-run artifacts
    pub workspace_dir: PathBuf,
    /// Interpreter used to run synthesized scripts
    pub interpreter: String,
    /// Host runtime module imported by synthesized scripts
    pub runtime_module: String,
    /// Directory of TOML tool documentation files
    #[serde(default)]
    pub tool_docs_dir: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backend: "gpt-4o".to_string(),
            effort: ReasoningEffort::Medium,
            max_attempts: 5,
            review_enabled: true,
            retrieval_enabled: true,
            candidate_limit: 8,
            backend_timeout_secs: 120,
            sandbox_timeout_secs: 300,
            workspace_dir: PathBuf::from("spatial-agent-runs"),
            interpreter: "python3".to_string(),
            runtime_module: "spatial_runtime".to_string(),
            tool_docs_dir: None,
        }
    }
}

impl AgentSettings {
    /// Load settings from defaults, an optional TOML file and `SA_*` variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("backend", defaults.backend.clone())
            .and_then(|b| b.set_default("effort", defaults.effort.to_string()))
            .and_then(|b| b.set_default("max_attempts", defaults.max_attempts as i64))
            .and_then(|b| b.set_default("review_enabled", defaults.review_enabled))
            .and_then(|b| b.set_default("retrieval_enabled", defaults.retrieval_enabled))
            .and_then(|b| b.set_default("candidate_limit", defaults.candidate_limit as i64))
            .and_then(|b| {
                b.set_default("backend_timeout_secs", defaults.backend_timeout_secs as i64)
            })
            .and_then(|b| {
                b.set_default("sandbox_timeout_secs", defaults.sandbox_timeout_secs as i64)
            })
            .and_then(|b| {
                b.set_default(
                    "workspace_dir",
                    defaults.workspace_dir.to_string_lossy().to_string(),
                )
            })
            .and_then(|b| b.set_default("interpreter", defaults.interpreter.clone()))
            .and_then(|b| b.set_default("runtime_module", defaults.runtime_module.clone()))
            .map_err(|e| Error::configuration(e.to_string()))?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: AgentSettings = builder
            .add_source(Environment::with_prefix("SA").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::configuration(e.to_string()))?;

        settings.validate()?;
        debug!(backend = %settings.backend, max_attempts = settings.max_attempts, "Settings loaded");
        Ok(settings)
    }

    /// Reject values no run could use
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(Error::configuration("backend must not be empty"));
        }
        if self.candidate_limit == 0 {
            return Err(Error::configuration("candidate_limit must be at least 1"));
        }
        if self.backend_timeout_secs == 0 || self.sandbox_timeout_secs == 0 {
            return Err(Error::configuration("timeouts must be greater than zero"));
        }
        if self.interpreter.trim().is_empty() {
            return Err(Error::configuration("interpreter must not be empty"));
        }
        Ok(())
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_review(mut self, enabled: bool) -> Self {
        self.review_enabled = enabled;
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn timeouts(&self) -> TimeoutSettings {
        TimeoutSettings {
            backend: Duration::from_secs(self.backend_timeout_secs),
            sandbox: Duration::from_secs(self.sandbox_timeout_secs),
        }
    }

    pub fn sandbox(&self) -> SandboxSettings {
        SandboxSettings {
            interpreter: self.interpreter.clone(),
            runtime_module: self.runtime_module.clone(),
            workspace_dir: self.workspace_dir.clone(),
            timeout: Duration::from_secs(self.sandbox_timeout_secs),
        }
    }
}

/// Per-call timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub backend: Duration,
    pub sandbox: Duration,
}

/// Sandbox process settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSettings {
    pub interpreter: String,
    pub runtime_module: String,
    pub workspace_dir: PathBuf,
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (_, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(v, "bar baz");
        let (_, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_export_and_comments() {
        let (k, v) = parse_env_line("export OPENAI_API_KEY=sk-1").unwrap();
        assert_eq!(k, "OPENAI_API_KEY");
        assert_eq!(v, "sk-1");
        assert!(parse_env_line("# comment").is_none());
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_get_config_treats_empty_as_unset() {
        std::env::set_var("GET_CONFIG_TEST_EMPTY", "");
        std::env::set_var("GET_CONFIG_TEST_SET", "gpt-5.1");
        assert_eq!(get_config_opt("GET_CONFIG_TEST_EMPTY"), None);
        assert_eq!(get_config("GET_CONFIG_TEST_EMPTY", "gpt-4o"), "gpt-4o");
        assert_eq!(get_config("GET_CONFIG_TEST_SET", "gpt-4o"), "gpt-5.1");
        assert_eq!(get_config_opt("GET_CONFIG_TEST_MISSING"), None);
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "backend = \"gpt-5.1\"\neffort = \"high\"\nmax_attempts = 2\nreview_enabled = false"
        )
        .unwrap();

        let settings = AgentSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.backend, "gpt-5.1");
        assert_eq!(settings.effort, ReasoningEffort::High);
        assert_eq!(settings.max_attempts, 2);
        assert!(!settings.review_enabled);
        assert_eq!(settings.candidate_limit, 8);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = AgentSettings {
            candidate_limit: 0,
            ..AgentSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_derived_views() {
        let settings = AgentSettings::default();
        assert_eq!(settings.timeouts().sandbox, Duration::from_secs(300));
        assert_eq!(settings.sandbox().interpreter, "python3");
    }
}
