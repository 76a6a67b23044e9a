//! Query intent classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Patterns, matched against the lower-cased trimmed query, that mark
/// entity or list questions.
const AGGREGATE_PATTERNS: &[&str] = &[
    r"^who\s+(are|is|were|was)\s+",
    r"^what\s+(are|is|were|was)\s+all\s+",
    r"^what\s+(are|is)\s+the\s+\w+s\b",
    r"^list\s+(all\s+)?(the\s+)?",
    r"^name\s+(all\s+)?(the\s+)?",
    r"^which\s+\w+s\s+(are|were|have|had)",
    r"^how\s+many\s+",
    r"^give\s+me\s+(a\s+)?list\s+",
    r"^enumerate\s+",
    r"^identify\s+(all\s+)?(the\s+)?",
];

static AGGREGATE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    AGGREGATE_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// How an answer is generated for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    /// Grounded answer from the best-ranked sources.
    Standard,
    /// Entity/list question synthesized across many documents.
    Aggregated,
}

impl QueryStrategy {
    pub fn classify(query: &str) -> Self {
        let normalized = query.trim().to_lowercase();
        if AGGREGATE_REGEXES.iter().any(|re| re.is_match(&normalized)) {
            Self::Aggregated
        } else {
            Self::Standard
        }
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self, Self::Aggregated)
    }
}
