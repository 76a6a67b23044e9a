//! Answers, citations and their output contract.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Canonical answer text when nothing relevant was found.
pub const NOT_FOUND_ANSWER: &str = "No relevant information found in the indexed documents.";

/// Source reference backing part of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_name: String,
    pub page_number: u32,
    pub verbatim_quote: String,
    /// Reranker confidence of the cited chunk, in [0, 1].
    pub relevance_score: f64,
}

impl Citation {
    /// `N. name (page P)` plus an indented quote, truncated to 200 chars.
    pub fn format_human_readable(&self, index: usize, include_quote: bool) -> String {
        let mut out = format!("{index}. {} (page {})", self.document_name, self.page_number);
        if include_quote && !self.verbatim_quote.is_empty() {
            let quote = truncate_chars(&self.verbatim_quote, 200);
            out.push_str(&format!("\n   \"{quote}\""));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub chunks_retrieved: usize,
    pub chunks_used: usize,
    pub processing_time_ms: u64,
    pub confidence_score: f64,
    pub quotes_verified: usize,
}

/// A generated answer with its citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub query_text: String,
    pub metadata: ResponseMetadata,
    pub not_found: bool,
}

impl Response {
    /// The canonical "nothing found" response.
    pub fn not_found(
        query_text: impl Into<String>,
        chunks_retrieved: usize,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            citations: Vec::new(),
            query_text: query_text.into(),
            metadata: ResponseMetadata {
                chunks_retrieved,
                chunks_used: 0,
                processing_time_ms,
                confidence_score: 0.0,
                quotes_verified: 0,
            },
            not_found: true,
        }
    }

    /// JSON output contract consumed by scripts.
    pub fn to_json_dict(&self) -> Value {
        let citations: Vec<Value> = self
            .citations
            .iter()
            .map(|c| {
                json!({
                    "document_name": c.document_name,
                    "page_number": c.page_number,
                    "verbatim_quote": c.verbatim_quote,
                    "relevance_score": c.relevance_score,
                })
            })
            .collect();

        json!({
            "query": self.query_text,
            "answer": self.answer,
            "citations": citations,
            "metadata": {
                "chunks_retrieved": self.metadata.chunks_retrieved,
                "chunks_used": self.metadata.chunks_used,
                "processing_time_ms": self.metadata.processing_time_ms,
                "confidence_score": round_to(self.metadata.confidence_score, 2),
                "quotes_verified": self.metadata.quotes_verified,
            },
        })
    }

    pub fn format_human_readable(&self, include_quotes: bool) -> String {
        let mut lines = vec![format!("Query: {}", self.query_text), String::new()];

        if self.not_found {
            lines.push(NOT_FOUND_ANSWER.to_string());
            lines.push(String::new());
            lines.push("This query may be outside the scope of the indexed content.".to_string());
        } else {
            lines.push("Answer:".to_string());
            lines.push(self.answer.clone());
            lines.push(String::new());
            if !self.citations.is_empty() {
                lines.push("Sources:".to_string());
                for (i, citation) in self.citations.iter().enumerate() {
                    lines.push(citation.format_human_readable(i + 1, include_quotes));
                    lines.push(String::new());
                }
            }
        }

        lines.push("---".to_string());
        let mut footer = vec![
            format!("Retrieved {} chunks", self.metadata.chunks_retrieved),
            format!("Used {} sources", self.metadata.chunks_used),
        ];
        if self.metadata.confidence_score > 0.0 {
            footer.push(format!(
                "Confidence: {}%",
                (self.metadata.confidence_score * 100.0) as u32
            ));
        }
        footer.push(format!(
            "Response time: {:.1}s",
            self.metadata.processing_time_ms as f64 / 1000.0
        ));
        lines.push(footer.join(" | "));
        lines.join("\n")
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// First `max` characters of `s`, with "..." appended when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}
