//! Data collaborator interface
//!
//! The host application owns the data. It supplies dataset summaries for
//! prompts and resolves logical dataset names to handles the synthesized
//! script can load.

use async_trait::async_trait;
use sa_core::{DataContext, DatasetSummary, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Location of one dataset as the runtime module loads it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub name: String,
    /// Disk path, URL or provider URI
    pub location: String,
    /// Format hint, e.g. `ESRI shapefile` or `GeoTIFF`
    #[serde(default)]
    pub format: Option<String>,
}

/// Source of dataset summaries and handles
#[async_trait]
pub trait DataCollaborator: Send + Sync {
    /// Summaries of every dataset available to a request
    async fn summaries(&self) -> Result<DataContext>;

    /// Resolve a logical dataset name
    async fn resolve(&self, name: &str) -> Result<DatasetHandle>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    summary: DatasetSummary,
    location: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    datasets: Vec<ManifestEntry>,
}

/// Collaborator backed by a JSON manifest
///
/// ```json
/// {"datasets": [
///   {"name": "points", "kind": "vector", "geometry_type": "Point",
///    "crs": "EPSG:32617", "location": "/data/points.shp", "format": "ESRI shapefile"}
/// ]}
/// ```
#[derive(Debug, Clone)]
pub struct ManifestCollaborator {
    entries: Vec<ManifestEntry>,
}

impl ManifestCollaborator {
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(content)?;
        let mut seen = std::collections::HashSet::new();
        for entry in &manifest.datasets {
            if !seen.insert(entry.summary.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "dataset '{}' listed twice in manifest",
                    entry.summary.name
                )));
            }
        }
        Ok(Self {
            entries: manifest.datasets,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::not_found(format!("data manifest {}: {}", path.display(), e))
        })?;
        let collaborator = Self::from_json(&content)?;
        info!(path = %path.display(), datasets = collaborator.entries.len(), "Loaded data manifest");
        Ok(collaborator)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DataCollaborator for ManifestCollaborator {
    async fn summaries(&self) -> Result<DataContext> {
        Ok(DataContext::new(
            self.entries.iter().map(|e| e.summary.clone()).collect(),
        ))
    }

    async fn resolve(&self, name: &str) -> Result<DatasetHandle> {
        self.entries
            .iter()
            .find(|e| e.summary.name == name)
            .map(|e| DatasetHandle {
                name: e.summary.name.clone(),
                location: e.location.clone(),
                format: e.format.clone(),
            })
            .ok_or_else(|| Error::not_found(format!("dataset '{}'", name)))
    }
}
