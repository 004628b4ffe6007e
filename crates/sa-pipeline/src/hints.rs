//! Error-pattern hints for the repair prompt
//!
//! Known failure families are matched against the diagnostic text and turned
//! into targeted suggestions. Matching is case-insensitive and every
//! matching family contributes, in declaration order.

use lazy_static::lazy_static;
use regex::RegexSet;
use sa_core::Diagnostic;
use std::fmt;

/// Family of a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    Environment,
    DataAccess,
    Algorithm,
    Geometry,
    AttributeField,
    Projection,
    Memory,
    Syntax,
}

impl fmt::Display for ErrorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorFamily::Environment => "import/environment",
            ErrorFamily::DataAccess => "data access",
            ErrorFamily::Algorithm => "algorithm",
            ErrorFamily::Geometry => "geometry",
            ErrorFamily::AttributeField => "attribute field",
            ErrorFamily::Projection => "projection",
            ErrorFamily::Memory => "memory",
            ErrorFamily::Syntax => "syntax",
        };
        write!(f, "{}", name)
    }
}

struct Family {
    family: ErrorFamily,
    patterns: RegexSet,
    suggestions: &'static [&'static str],
}

fn family(family: ErrorFamily, patterns: &[&str], suggestions: &'static [&'static str]) -> Family {
    let patterns: Vec<String> = patterns.iter().map(|p| format!("(?i){}", p)).collect();
    Family {
        family,
        patterns: RegexSet::new(patterns).unwrap(),
        suggestions,
    }
}

lazy_static! {
    static ref FAMILIES: Vec<Family> = vec![
        family(
            ErrorFamily::Environment,
            &[r"ImportError", r"ModuleNotFoundError", r"No module named", r"cannot import name", r"DLL load failed"],
            &[
                "Check that the required library is installed in the runtime environment",
                "Import from the correct module path",
                "Prefer the runtime module's own helpers over third-party imports",
            ],
        ),
        family(
            ErrorFamily::DataAccess,
            &[r"FileNotFoundError", r"No such file", r"Invalid data source", r"cannot open", r"Path does not exist", r"Permission denied"],
            &[
                "Use the dataset handles loaded by the scaffold instead of hard-coded paths",
                "Write outputs only below OUTPUT_DIR",
                "Check that the file extension matches the actual format",
            ],
        ),
        family(
            ErrorFamily::Algorithm,
            &[r"Algorithm.*not found", r"native:.*not available", r"gdal:.*error", r"Parameter.*required", r"Invalid algorithm", r"Algorithm.*does not exist", r"unexpected keyword argument"],
            &[
                "Check the tool name spelling against the tool documentation",
                "Use the parameter names exactly as documented",
                "Ensure every required parameter is provided",
            ],
        ),
        family(
            ErrorFamily::Geometry,
            &[r"Geometry.*invalid", r"TopologyException", r"GEOS.*error", r"Self-intersection", r"Invalid polygon", r"Ring.*not closed"],
            &[
                "Repair geometries before the failing operation (e.g. a fix geometries tool or buffer(0))",
                "Remove self-intersecting polygons",
                "Ensure polygon rings are closed",
            ],
        ),
        family(
            ErrorFamily::AttributeField,
            &[r"KeyError", r"Field.*not found", r"AttributeError.*field", r"Column.*does not exist", r"Field name.*too long", r"Invalid field name"],
            &[
                "Check field names against the attribute schema in the data overview",
                "Shapefile field names are limited to 10 characters; truncate new field names",
                "List the layer's fields before accessing one",
            ],
        ),
        family(
            ErrorFamily::Projection,
            &[r"CRS.*not found", r"Projection.*error", r"Transform.*failed", r"EPSG.*invalid", r"Coordinate.*out of range"],
            &[
                "Reproject layers to a matching CRS before combining them",
                "Use a projected CRS for distances and areas",
                "Use EPSG codes for standard projections",
            ],
        ),
        family(
            ErrorFamily::Memory,
            &[r"MemoryError", r"Out of memory", r"Cannot allocate memory", r"Killed.*memory"],
            &[
                "Process data in smaller chunks or tiles",
                "Simplify geometries before processing",
                "Write intermediate results to files instead of keeping them in memory",
            ],
        ),
        family(
            ErrorFamily::Syntax,
            &[r"SyntaxError", r"IndentationError", r"TabError", r"invalid syntax", r"unexpected EOF", r"was never closed"],
            &[
                "Fix the syntax at the reported line and keep indentation consistent",
                "Return the complete program, not a fragment",
            ],
        ),
    ];
}

/// Suggestions for one matched family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub family: ErrorFamily,
    pub suggestions: Vec<String>,
}

/// Families matching a diagnostic
pub fn classify(diagnostic: &Diagnostic) -> Vec<ErrorFamily> {
    matching(diagnostic).map(|f| f.family).collect()
}

fn matching(diagnostic: &Diagnostic) -> impl Iterator<Item = &'static Family> {
    let text = format!("{}\n{}", diagnostic.headline(), diagnostic.raw);
    FAMILIES.iter().filter(move |f| f.patterns.is_match(&text))
}

pub fn hints_for(diagnostic: &Diagnostic) -> Vec<Hint> {
    matching(diagnostic)
        .map(|f| Hint {
            family: f.family,
            suggestions: f.suggestions.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

/// Text block for the repair prompt; empty when nothing matched
pub fn render_hints(hints: &[Hint]) -> String {
    let mut out = String::new();
    for hint in hints {
        out.push_str(&format!("Detected {} error. Suggestions:\n", hint.family));
        for s in &hint.suggestions {
            out.push_str(&format!("- {}\n", s));
        }
    }
    out
}
