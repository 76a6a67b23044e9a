//! Grounding checks: structured-output parsing, quote verification,
//! citation resolution and confidence scoring.
//!
//! A model may cite sources that do not exist, paraphrase instead of quote,
//! or return malformed JSON. Everything here degrades instead of failing:
//! bad indices are dropped, unverifiable quotes are replaced by the closest
//! sentence of the cited source, and unparseable output becomes a plain
//! answer without citations.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::retriever::RetrievedChunk;
use crate::models::Citation;
use crate::models::response::{round_to, truncate_chars};
use crate::providers::strip_code_fences;

/// Share of quote words that must appear in the source.
pub const QUOTE_OVERLAP_THRESHOLD: f64 = 0.8;

/// Longest quote substituted or synthesized from a source.
pub const MAX_QUOTE_CHARS: usize = 200;

/// Citations synthesized when the model provides none.
const FALLBACK_CITATIONS: usize = 3;

/// A citation as reported by the model; `source_index` is 1-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCitation {
    pub source_index: i64,
    pub verbatim_quote: String,
}

/// Structured answer reported by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAnswer {
    pub answer: String,
    pub citations: Vec<ModelCitation>,
    pub not_found: bool,
}

impl ModelAnswer {
    /// Parse `{answer, citations, not_found}`, optionally fenced.
    ///
    /// Never fails: text that is not a JSON object becomes the answer with
    /// no citations. Malformed citation entries are skipped.
    pub fn parse_lenient(raw: &str) -> Self {
        let body = strip_code_fences(raw);
        let value = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => {
                warn!("Structured answer is not a JSON object; using raw text");
                return Self::raw(body);
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse structured answer; using raw text");
                return Self::raw(body);
            }
        };

        let citations = value
            .get("citations")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_citation).collect())
            .unwrap_or_default();

        Self {
            answer: value
                .get("answer")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            citations,
            not_found: value
                .get("not_found")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    fn raw(text: &str) -> Self {
        Self {
            answer: text.to_string(),
            citations: Vec::new(),
            not_found: false,
        }
    }
}

fn parse_citation(item: &Value) -> Option<ModelCitation> {
    let index = item.get("source_index")?;
    let source_index = index
        .as_i64()
        .or_else(|| index.as_f64().map(|f| f as i64))
        .or_else(|| index.as_str().and_then(|s| s.trim().parse().ok()))?;
    Some(ModelCitation {
        source_index,
        verbatim_quote: item
            .get("verbatim_quote")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Whether `quote` appears in `content`, exactly (ignoring case) or by
/// sufficient word overlap.
pub fn validate_quote(quote: &str, content: &str) -> bool {
    if quote.trim().is_empty() || content.is_empty() {
        return false;
    }
    let quote_lower = quote.trim().to_lowercase();
    if content.to_lowercase().contains(&quote_lower) {
        return true;
    }

    let quote_words = word_set(&quote_lower);
    if quote_words.is_empty() {
        return false;
    }
    let content_words = word_set(content);
    let overlap = quote_words.intersection(&content_words).count();
    overlap as f64 / quote_words.len() as f64 >= QUOTE_OVERLAP_THRESHOLD
}

fn sentences(content: &str) -> Vec<String> {
    content
        .replace('\n', " ")
        .split(". ")
        .map(str::to_string)
        .collect()
}

/// The sentence of `content` sharing the most words with `quote`.
///
/// Falls back to [`extract_best_quote`] when no sentence shares a word, so
/// the result is always source text unless `content` is empty.
pub fn find_similar_quote(quote: &str, content: &str) -> String {
    if content.is_empty() {
        return quote.to_string();
    }

    let quote_words = word_set(quote);
    let mut best = String::new();
    let mut best_score = 0;
    for sentence in sentences(content) {
        let score = word_set(&sentence).intersection(&quote_words).count();
        if score > best_score {
            best_score = score;
            best = sentence.trim().to_string();
        }
    }

    if best.is_empty() {
        extract_best_quote(content)
    } else {
        truncate_chars(&best, MAX_QUOTE_CHARS)
    }
}

/// First substantial sentence of `content`, else its truncated start.
pub fn extract_best_quote(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    sentences(content)
        .iter()
        .map(|s| s.trim())
        .find(|s| s.chars().count() >= 50)
        .map(|s| truncate_chars(s, MAX_QUOTE_CHARS))
        .unwrap_or_else(|| truncate_chars(content, MAX_QUOTE_CHARS))
}

/// Resolve model citations against the context chunks.
///
/// Returns the citations and how many of their quotes were verified.
pub fn resolve_citations(
    reported: &[ModelCitation],
    chunks: &[RetrievedChunk],
) -> (Vec<Citation>, usize) {
    let mut citations = Vec::new();
    let mut seen = HashSet::new();
    let mut verified = 0;

    for cited in reported {
        let Some(chunk) = cited
            .source_index
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| chunks.get(i))
        else {
            debug!(source_index = cited.source_index, "Dropping citation with invalid source index");
            continue;
        };

        if !seen.insert(cited.verbatim_quote.clone()) {
            continue;
        }

        let mut quote = cited.verbatim_quote.clone();
        if !quote.trim().is_empty() {
            if validate_quote(&quote, &chunk.content) {
                verified += 1;
            } else {
                debug!(
                    quote = %truncate_chars(&quote, 50),
                    "Quote not found in source; substituting closest sentence"
                );
                quote = find_similar_quote(&quote, &chunk.content);
            }
        }

        citations.push(Citation {
            document_name: chunk.document_name.clone(),
            page_number: chunk.page_number,
            verbatim_quote: quote,
            relevance_score: chunk.relevance_score,
        });
    }

    if citations.is_empty() {
        for chunk in chunks.iter().take(FALLBACK_CITATIONS) {
            citations.push(Citation {
                document_name: chunk.document_name.clone(),
                page_number: chunk.page_number,
                verbatim_quote: extract_best_quote(&chunk.content),
                relevance_score: chunk.relevance_score,
            });
            verified += 1;
        }
    }

    (citations, verified)
}

/// Confidence in [0, 1], rounded to 2 decimals.
///
/// Mean citation relevance, plus a small bonus per source, minus a penalty
/// for inconsistent scores.
pub fn confidence_score(chunks: &[RetrievedChunk], citations: &[Citation]) -> f64 {
    if chunks.is_empty() || citations.is_empty() {
        return 0.0;
    }

    let mut scores: Vec<f64> = citations
        .iter()
        .map(|c| c.relevance_score)
        .filter(|s| *s > 0.0)
        .collect();
    if scores.is_empty() {
        scores = chunks
            .iter()
            .take(citations.len())
            .map(|c| c.relevance_score)
            .collect();
    }
    if scores.is_empty() {
        return 0.0;
    }

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let source_bonus = (citations.len() as f64 * 0.02).min(0.1);
    let variance_penalty = if scores.len() > 1 {
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        (variance * 0.5).min(0.1)
    } else {
        0.0
    };

    round_to(mean + source_bonus - variance_penalty, 2).clamp(0.0, 1.0)
}
