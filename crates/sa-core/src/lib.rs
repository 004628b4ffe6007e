//! Core types and utilities for the spatial analysis agent
//!
//! # Modules
//!
//! - `config`: Environment loading and operator settings
//! - `error`: Error taxonomy and Result alias
//! - `execution`: Execution attempts, the append-only attempt chain
//! - `task`: Task decomposition model (TaskSpec, Operation)
//! - `types`: Request, data context and shared enums

pub mod config;
pub mod error;
pub mod execution;
pub mod task;
pub mod types;

// Re-exports
pub use config::{AgentSettings, SandboxSettings, TimeoutSettings};
pub use error::{EdgeViolation, Error, Result};
pub use execution::{
    AttemptChain, AttemptOutcome, Diagnostic, ExecutionAttempt, RunStatus, UnresolvedOperation,
};
pub use task::{dependency_order, Operation, OperationCategory, OperationId, OrderError, TaskSpec};
pub use types::*;
