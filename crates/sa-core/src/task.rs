//! Task decomposition model
//!
//! A TaskSpec is an ordered list of Operations. Each Operation may only
//! depend on Operations listed before it, which keeps the dependency graph
//! acyclic without a separate cycle check.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use thiserror::Error as ThisError;

use crate::error::{Error, Result};

/// Identifier of an Operation within its TaskSpec
pub type OperationId = u32;

/// Broad category of an analysis operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Filter,
    Compute,
    Aggregate,
    Transform,
    Overlay,
    Reproject,
    Join,
    Visualize,
    Io,
    #[serde(other)]
    Other,
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationCategory::Filter => "filter",
            OperationCategory::Compute => "compute",
            OperationCategory::Aggregate => "aggregate",
            OperationCategory::Transform => "transform",
            OperationCategory::Overlay => "overlay",
            OperationCategory::Reproject => "reproject",
            OperationCategory::Join => "join",
            OperationCategory::Visualize => "visualize",
            OperationCategory::Io => "io",
            OperationCategory::Other => "other",
        };
        write!(f, "{}", name)
    }
}

impl OperationCategory {
    /// All categories, in declaration order
    pub const ALL: [OperationCategory; 10] = [
        OperationCategory::Filter,
        OperationCategory::Compute,
        OperationCategory::Aggregate,
        OperationCategory::Transform,
        OperationCategory::Overlay,
        OperationCategory::Reproject,
        OperationCategory::Join,
        OperationCategory::Visualize,
        OperationCategory::Io,
        OperationCategory::Other,
    ];
}

/// One discrete unit of analysis work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub category: OperationCategory,
    #[serde(default)]
    pub depends_on: Vec<OperationId>,
}

impl Operation {
    pub fn new(id: OperationId, label: &str, category: OperationCategory) -> Self {
        Self {
            id,
            label: label.to_string(),
            description: String::new(),
            category,
            depends_on: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn depends_on(mut self, ids: &[OperationId]) -> Self {
        self.depends_on = ids.to_vec();
        self
    }

    /// Text used for catalog retrieval
    pub fn query_text(&self) -> String {
        if self.description.is_empty() {
            self.label.clone()
        } else {
            format!("{} {}", self.label, self.description)
        }
    }
}

/// Structured decomposition of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Short slug used for artifact names
    pub name: String,
    pub summary: String,
    pub operations: Vec<Operation>,
}

impl TaskSpec {
    /// Build a TaskSpec, rejecting invalid dependency references
    pub fn new(name: &str, summary: &str, operations: Vec<Operation>) -> Result<Self> {
        let spec = Self {
            name: name.to_string(),
            summary: summary.to_string(),
            operations,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check ids are unique and every dependency points at an earlier Operation
    pub fn validate(&self) -> Result<()> {
        let mut defined: HashSet<OperationId> = HashSet::new();
        for op in &self.operations {
            if defined.contains(&op.id) {
                return Err(Error::decomposition(format!(
                    "duplicate operation id {}",
                    op.id
                )));
            }
            for dep in &op.depends_on {
                if *dep == op.id {
                    return Err(Error::decomposition(format!(
                        "operation {} depends on itself",
                        op.id
                    )));
                }
                if !defined.contains(dep) {
                    return Err(Error::decomposition(format!(
                        "operation {} references dependency {} which is not defined before it",
                        op.id, dep
                    )));
                }
            }
            defined.insert(op.id);
        }
        Ok(())
    }

    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.iter().find(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Topological order of operation ids, ties broken by position
    pub fn topological_order(&self) -> Result<Vec<OperationId>> {
        let order = dependency_order(
            self.operations
                .iter()
                .map(|op| (op.id, op.depends_on.as_slice())),
        )
        .map_err(|e| Error::decomposition(e.to_string()))?;
        Ok(order.into_iter().map(|i| self.operations[i].id).collect())
    }
}

/// Why a set of dependencies has no topological order
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("duplicate operation id {0}")]
    Duplicate(OperationId),

    #[error("operation {operation} depends on unknown operation {dependency}")]
    Unknown {
        operation: OperationId,
        dependency: OperationId,
    },

    #[error("dependency cycle between operations")]
    Cycle,
}

/// Kahn's algorithm over `(id, depends_on)` pairs
///
/// Returns positions into the input. Among ready items the earliest
/// position goes first, so an already ordered input comes back unchanged.
pub fn dependency_order<'a, I>(items: I) -> std::result::Result<Vec<usize>, OrderError>
where
    I: IntoIterator<Item = (OperationId, &'a [OperationId])>,
{
    let items: Vec<(OperationId, &[OperationId])> = items.into_iter().collect();
    let mut position: HashMap<OperationId, usize> = HashMap::with_capacity(items.len());
    for (i, (id, _)) in items.iter().enumerate() {
        if position.insert(*id, i).is_some() {
            return Err(OrderError::Duplicate(*id));
        }
    }

    let mut indegree: Vec<usize> = items.iter().map(|(_, deps)| deps.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, (id, deps)) in items.iter().enumerate() {
        for dep in *deps {
            let d = *position.get(dep).ok_or(OrderError::Unknown {
                operation: *id,
                dependency: *dep,
            })?;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..items.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(items.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for d in &dependents[next] {
            indegree[*d] -= 1;
            if indegree[*d] == 0 {
                ready.insert(*d);
            }
        }
    }

    if order.len() != items.len() {
        return Err(OrderError::Cycle);
    }
    Ok(order)
}

/// Lowercase slug with underscores, limited to `max_len` characters
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut last_sep = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            slug.push('_');
            last_sep = true;
        }
        if slug.len() >= max_len {
            break;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}
