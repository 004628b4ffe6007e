//! Error types for the spatial analysis agent

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::DataKind;

/// An edge of the workflow graph that failed kind validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeViolation {
    /// Source node id, or `dataset:<name>` for request data
    pub from: String,
    /// Source output port
    pub from_port: String,
    /// Destination node id
    pub to: String,
    /// Destination input port
    pub to_port: String,
    /// Kind produced by the source
    pub produced: DataKind,
    /// Kind expected by the destination
    pub expected: DataKind,
}

impl fmt::Display for EdgeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{} produces {} but {} is expected",
            self.from, self.from_port, self.to, self.to_port, self.produced, self.expected
        )
    }
}

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Graph validation error: {0}")]
    GraphValidation(EdgeViolation),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Backend authentication failed: {0}")]
    BackendAuth(String),

    #[error("Backend rate limited: {0}")]
    BackendRateLimited(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a decomposition error
    pub fn decomposition(msg: impl Into<String>) -> Self {
        Error::Decomposition(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    /// Create a sandbox error
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Error::Sandbox(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Structural errors halt a run before anything is executed
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::Decomposition(_)
                | Error::GraphValidation(_)
                | Error::InvalidGraph(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
