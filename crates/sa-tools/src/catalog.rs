//! Operation catalog
//!
//! The catalog is shared read-only between concurrent runs. `InMemoryCatalog`
//! keeps entries in name order so listings and category matches are stable.

use async_trait::async_trait;
use sa_core::{OperationCategory, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::documentation::load_tool_docs;
use crate::index::{ScoredTool, SimilarityIndex};
use crate::tool::ToolSpec;

/// Catalog of available geoprocessing operations
#[async_trait]
pub trait OperationCatalog: Send + Sync {
    /// All entries, ordered by name
    async fn list(&self) -> Vec<ToolSpec>;

    /// Look up one entry
    async fn get(&self, name: &str) -> Option<ToolSpec>;

    /// Entries of one category, ordered by name
    async fn by_category(&self, category: OperationCategory) -> Vec<ToolSpec>;

    /// Similarity search; None when the catalog has no index
    async fn search(&self, query: &str, limit: usize) -> Option<Vec<ScoredTool>>;

    async fn len(&self) -> usize {
        self.list().await.len()
    }
}

/// Catalog held in memory with a lazily built similarity index
pub struct InMemoryCatalog {
    tools: RwLock<BTreeMap<String, ToolSpec>>,
    index: RwLock<Option<Arc<SimilarityIndex>>>,
    index_enabled: bool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            index: RwLock::new(None),
            index_enabled: true,
        }
    }

    /// Catalog without a similarity index
    pub fn without_index() -> Self {
        Self {
            index_enabled: false,
            ..Self::new()
        }
    }

    /// Build from a list of entries
    pub async fn from_tools(tools: Vec<ToolSpec>) -> Result<Self> {
        let catalog = Self::new();
        for tool in tools {
            catalog.register(tool).await?;
        }
        Ok(catalog)
    }

    /// Build from a directory of TOML tool documentation files
    pub async fn from_dir(dir: &Path) -> Result<Self> {
        let tools = load_tool_docs(dir)?;
        let catalog = Self::from_tools(tools).await?;
        info!(dir = %dir.display(), tools = catalog.tools.read().await.len(), "Loaded tool catalog");
        Ok(catalog)
    }

    /// Register an entry, replacing any entry with the same name
    pub async fn register(&self, tool: ToolSpec) -> Result<()> {
        tool.validate()?;
        debug!("Registered tool: {}", tool.name);
        self.tools.write().await.insert(tool.name.clone(), tool);
        *self.index.write().await = None;
        Ok(())
    }

    async fn index(&self) -> Option<Arc<SimilarityIndex>> {
        if !self.index_enabled {
            return None;
        }
        if let Some(index) = self.index.read().await.as_ref() {
            return Some(index.clone());
        }
        let mut slot = self.index.write().await;
        if let Some(index) = slot.as_ref() {
            return Some(index.clone());
        }
        let tools: Vec<ToolSpec> = self.tools.read().await.values().cloned().collect();
        let built = Arc::new(SimilarityIndex::build(&tools));
        debug!(entries = built.len(), "Built similarity index");
        *slot = Some(built.clone());
        Some(built)
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationCatalog for InMemoryCatalog {
    async fn list(&self) -> Vec<ToolSpec> {
        self.tools.read().await.values().cloned().collect()
    }

    async fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools.read().await.get(name).cloned()
    }

    async fn by_category(&self, category: OperationCategory) -> Vec<ToolSpec> {
        self.tools
            .read()
            .await
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect()
    }

    async fn search(&self, query: &str, limit: usize) -> Option<Vec<ScoredTool>> {
        let index = self.index().await?;
        Some(index.search(query, limit))
    }

    async fn len(&self) -> usize {
        self.tools.read().await.len()
    }
}
