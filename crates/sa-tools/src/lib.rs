//! Operation catalog and tool bindings
//!
//! Provides:
//! - `ToolSpec`: catalog entries with typed ports and parameter schemas
//! - `OperationCatalog` / `InMemoryCatalog`: shared read-only catalog
//! - `SimilarityIndex`: BM25 retrieval used to narrow tool candidates
//! - TOML tool documentation loading
//! - `ToolBinding`: the tools chosen for one operation

pub mod binding;
pub mod catalog;
pub mod documentation;
pub mod index;
pub mod tool;

pub use binding::{BoundTool, InputSource, ToolBinding};
pub use catalog::{InMemoryCatalog, OperationCatalog};
pub use documentation::{load_tool_docs, parse_tool_doc};
pub use index::{ScoredTool, SimilarityIndex};
pub use tool::{ParameterSpec, PortSpec, ToolSpec};
