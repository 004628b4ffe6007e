//! BM25 similarity index over catalog entries
//!
//! Used to narrow the candidate set before the tool selection stage.
//! Scores are deterministic for a given catalog: equal scores fall back to
//! ordering by tool name.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::tool::ToolSpec;

const K1: f64 = 1.2;
const B: f64 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "the", "to", "with", "each", "all", "that", "this", "using",
];

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTool {
    pub name: String,
    pub score: f64,
}

struct IndexedDoc {
    name: String,
    term_freq: HashMap<String, u32>,
    length: usize,
}

/// Immutable BM25 index
pub struct SimilarityIndex {
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
    avg_length: f64,
}

/// Lowercase alphanumeric tokens with stopwords removed
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl SimilarityIndex {
    pub fn build(tools: &[ToolSpec]) -> Self {
        let mut docs = Vec::with_capacity(tools.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        for tool in tools {
            let tokens = tokenize(&tool.search_text());
            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len();
            docs.push(IndexedDoc {
                name: tool.name.clone(),
                term_freq,
                length: tokens.len(),
            });
        }

        let avg_length = if docs.is_empty() {
            0.0
        } else {
            total_length as f64 / docs.len() as f64
        };

        Self {
            docs,
            doc_freq,
            avg_length,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Top `limit` tools with a positive score, best first
    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredTool> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<ScoredTool> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let score: f64 = terms
                    .iter()
                    .map(|term| {
                        let tf = doc.term_freq.get(term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let norm = 1.0 - B + B * (doc.length as f64 / self.avg_length.max(1.0));
                        self.idf(term) * (tf * (K1 + 1.0)) / (tf + K1 * norm)
                    })
                    .sum();
                (score > 0.0).then(|| ScoredTool {
                    name: doc.name.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::{DataKind, OperationCategory};

    fn catalog() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("native:buffer", "Buffer", OperationCategory::Transform)
                .with_description("Buffer features by a fixed distance")
                .with_output("OUTPUT", DataKind::Vector),
            ToolSpec::new("native:fieldcalculator", "Field calculator", OperationCategory::Compute)
                .with_description("Compute a new attribute field from an expression")
                .with_output("OUTPUT", DataKind::Vector),
            ToolSpec::new("gdal:slope", "Slope", OperationCategory::Compute)
                .with_description("Slope from a digital elevation raster")
                .with_output("OUTPUT", DataKind::Raster),
            ToolSpec::new("native:multiringbuffer", "Multi-ring buffer", OperationCategory::Transform)
                .with_description("Buffer rings at a fixed distance")
                .with_output("OUTPUT", DataKind::Vector),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Buffer the points, by 100 m!"), vec!["buffer", "points", "100", "m"]);
    }

    #[test]
    fn test_search_ranks_relevant_first() {
        let index = SimilarityIndex::build(&catalog());
        let hits = index.search("buffer points by 100 meters", 10);
        assert_eq!(hits[0].name, "native:buffer");
        assert!(hits.iter().all(|h| h.name != "gdal:slope"));
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = SimilarityIndex::build(&catalog());
        let first = index.search("compute field slope", 10);
        for _ in 0..5 {
            assert_eq!(index.search("compute field slope", 10), first);
        }
    }

    #[test]
    fn test_ties_broken_by_name() {
        let tools = vec![
            ToolSpec::new("qgis:clip", "", OperationCategory::Overlay).with_output("OUTPUT", DataKind::Vector),
            ToolSpec::new("gdal:clip", "", OperationCategory::Overlay).with_output("OUTPUT", DataKind::Vector),
        ];
        let index = SimilarityIndex::build(&tools);
        let hits = index.search("clip", 10);
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["gdal:clip", "qgis:clip"]);
    }

    #[test]
    fn test_no_match() {
        let index = SimilarityIndex::build(&catalog());
        assert!(index.search("zzz qqq", 10).is_empty());
        assert!(index.search("", 10).is_empty());
    }
}
