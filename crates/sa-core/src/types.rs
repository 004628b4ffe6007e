//! Common types used across the agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Category of data flowing between operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Raster,
    Vector,
    Table,
    Scalar,
    /// Port accepts any kind
    Any,
}

impl DataKind {
    /// Whether a value of kind `produced` may feed a port of this kind.
    ///
    /// A vector layer may feed a table port since it carries an attribute table.
    pub fn accepts(&self, produced: DataKind) -> bool {
        match (self, produced) {
            (DataKind::Any, _) | (_, DataKind::Any) => true,
            (DataKind::Table, DataKind::Vector) => true,
            (expected, produced) => *expected == produced,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Raster => write!(f, "raster"),
            DataKind::Vector => write!(f, "vector"),
            DataKind::Table => write!(f, "table"),
            DataKind::Scalar => write!(f, "scalar"),
            DataKind::Any => write!(f, "any"),
        }
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raster" => Ok(DataKind::Raster),
            "vector" | "layer" | "features" => Ok(DataKind::Vector),
            "table" | "csv" => Ok(DataKind::Table),
            "scalar" | "number" | "value" => Ok(DataKind::Scalar),
            "any" => Ok(DataKind::Any),
            other => Err(format!("Unknown data kind: {}", other)),
        }
    }
}

/// Reasoning effort requested from a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasoningEffort::None => write!(f, "none"),
            ReasoningEffort::Minimal => write!(f, "minimal"),
            ReasoningEffort::Low => write!(f, "low"),
            ReasoningEffort::Medium => write!(f, "medium"),
            ReasoningEffort::High => write!(f, "high"),
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ReasoningEffort::None),
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!("Unknown reasoning effort: {}", other)),
        }
    }
}

/// Attribute field of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl FieldInfo {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
        }
    }
}

/// Bounding box in the dataset's CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Summary of one dataset, supplied by the data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Logical reference used in prompts and generated code
    pub name: String,
    pub kind: DataKind,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub schema: Vec<FieldInfo>,
    #[serde(default)]
    pub extent: Option<Extent>,
    #[serde(default)]
    pub feature_count: Option<u64>,
}

impl DatasetSummary {
    /// Create a summary with only a name and kind
    pub fn new(name: &str, kind: DataKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            geometry_type: None,
            crs: None,
            schema: Vec::new(),
            extent: None,
            feature_count: None,
        }
    }

    pub fn with_geometry(mut self, geometry_type: &str) -> Self {
        self.geometry_type = Some(geometry_type.to_string());
        self
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, field_type: &str) -> Self {
        self.schema.push(FieldInfo::new(name, field_type));
        self
    }

    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = Some(extent);
        self
    }

    /// One-paragraph description used in prompts
    pub fn describe(&self) -> String {
        let mut out = format!("- {} ({})", self.name, self.kind);
        if let Some(geometry) = &self.geometry_type {
            out.push_str(&format!(", geometry: {}", geometry));
        }
        if let Some(crs) = &self.crs {
            out.push_str(&format!(", crs: {}", crs));
        }
        if let Some(count) = self.feature_count {
            out.push_str(&format!(", features: {}", count));
        }
        if let Some(e) = &self.extent {
            out.push_str(&format!(
                ", extent: [{}, {}, {}, {}]",
                e.min_x, e.min_y, e.max_x, e.max_y
            ));
        }
        if !self.schema.is_empty() {
            let fields: Vec<String> = self
                .schema
                .iter()
                .map(|f| format!("{}:{}", f.name, f.field_type))
                .collect();
            out.push_str(&format!(", fields: {}", fields.join(", ")));
        }
        out
    }
}

/// Data context of a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataContext {
    pub datasets: Vec<DatasetSummary>,
}

impl DataContext {
    pub fn new(datasets: Vec<DatasetSummary>) -> Self {
        Self { datasets }
    }

    /// Look up a dataset by logical name
    pub fn get(&self, name: &str) -> Option<&DatasetSummary> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Keep only the named datasets, preserving original order
    pub fn retain_named(&self, names: &[String]) -> DataContext {
        DataContext {
            datasets: self
                .datasets
                .iter()
                .filter(|d| names.iter().any(|n| n == &d.name))
                .cloned()
                .collect(),
        }
    }

    /// Text rendering for prompts
    pub fn render(&self) -> String {
        if self.datasets.is_empty() {
            return "No datasets supplied.".to_string();
        }
        self.datasets
            .iter()
            .map(DatasetSummary::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A user submission, immutable once captured for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    id: Uuid,
    goal: String,
    data: DataContext,
    submitted_at: DateTime<Utc>,
}

impl Request {
    /// Capture a request with a fresh run id
    pub fn new(goal: impl Into<String>, data: DataContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            data,
            submitted_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn data(&self) -> &DataContext {
        &self.data
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_compatibility() {
        assert!(DataKind::Vector.accepts(DataKind::Vector));
        assert!(DataKind::Table.accepts(DataKind::Vector));
        assert!(DataKind::Any.accepts(DataKind::Raster));
        assert!(!DataKind::Raster.accepts(DataKind::Vector));
        assert!(!DataKind::Vector.accepts(DataKind::Table));
        assert!(!DataKind::Scalar.accepts(DataKind::Raster));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Vector".parse::<DataKind>().unwrap(), DataKind::Vector);
        assert_eq!("csv".parse::<DataKind>().unwrap(), DataKind::Table);
        assert!("mesh".parse::<DataKind>().is_err());
    }

    #[test]
    fn test_describe_dataset() {
        let ds = DatasetSummary::new("points", DataKind::Vector)
            .with_geometry("Point")
            .with_crs("EPSG:32617")
            .with_field("id", "integer");
        assert_eq!(
            ds.describe(),
            "- points (vector), geometry: Point, crs: EPSG:32617, fields: id:integer"
        );
    }

    #[test]
    fn test_retain_named_keeps_order() {
        let ctx = DataContext::new(vec![
            DatasetSummary::new("a", DataKind::Vector),
            DatasetSummary::new("b", DataKind::Raster),
            DatasetSummary::new("c", DataKind::Table),
        ]);
        let narrowed = ctx.retain_named(&["c".to_string(), "a".to_string()]);
        let names: Vec<_> = narrowed.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Request::new("buffer points", DataContext::default());
        let b = Request::new("buffer points", DataContext::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.goal(), "buffer points");
    }
}
