//! Two-stage retrieval: vector search, then cross-encoder reranking.
//!
//! The multi-document variant widens the candidate pool and selects chunks
//! so that aggregate questions see evidence from several documents.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::{CitelineError, ProviderError};
use crate::models::response::round_to;
use crate::providers::{Embedder, RerankerHandle};
use crate::store::{VectorHit, VectorStore};

/// Candidate pool multiplier for multi-document retrieval.
const MULTI_DOC_CANDIDATE_FACTOR: usize = 3;

/// A scored chunk returned by retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    pub document_id: String,
    pub document_name: String,
    pub page_number: u32,
    pub page_end: Option<u32>,
    pub chunk_index: usize,
    pub has_table: bool,
    /// Vector closeness in (0, 1]; higher is better.
    pub similarity_score: f64,
    /// Reranker confidence in [0, 1]; 0 until reranked.
    pub relevance_score: f64,
}

impl RetrievedChunk {
    fn from_hit(hit: VectorHit) -> Self {
        Self {
            similarity_score: 1.0 / (1.0 + f64::from(hit.distance)),
            relevance_score: 0.0,
            id: hit.id,
            content: hit.content,
            document_id: hit.metadata.document_id,
            document_name: hit.metadata.document_name,
            page_number: hit.metadata.page_number,
            page_end: hit.metadata.page_end,
            chunk_index: hit.metadata.chunk_index,
            has_table: hit.metadata.has_table,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    /// Ordered by relevance, best first.
    pub chunks: Vec<RetrievedChunk>,
    /// Candidates returned by the vector search.
    pub total_retrieved: usize,
    pub embedding_time_ms: u64,
    pub retrieval_time_ms: u64,
    pub rerank_time_ms: u64,
}

impl RetrievalResult {
    fn empty(query: &str, embedding_time_ms: u64, retrieval_time_ms: u64) -> Self {
        Self {
            query: query.to_string(),
            embedding_time_ms,
            retrieval_time_ms,
            ..Default::default()
        }
    }

    pub fn total_time_ms(&self) -> u64 {
        self.embedding_time_ms + self.retrieval_time_ms + self.rerank_time_ms
    }

    /// e.g. "embed: 12ms, search: 3ms, rerank: 40ms"; zero parts omitted.
    pub fn timing_breakdown(&self) -> String {
        let parts: Vec<String> = [
            ("embed", self.embedding_time_ms),
            ("search", self.retrieval_time_ms),
            ("rerank", self.rerank_time_ms),
        ]
        .iter()
        .filter(|(_, ms)| *ms > 0)
        .map(|(label, ms)| format!("{label}: {ms}ms"))
        .collect();
        if parts.is_empty() {
            "0ms".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub fn document_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.document_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Logistic transform of a raw cross-encoder logit, rounded to 4 decimals.
pub fn normalize_score(raw: f32) -> f64 {
    round_to(1.0 / (1.0 + (-f64::from(raw)).exp()), 4)
}

/// Relevance descending, then similarity descending, then document id and
/// chunk index ascending.
pub fn compare_relevance(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| b.similarity_score.total_cmp(&a.similarity_score))
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}

/// Pick up to `target_count` chunks from `ranked` (best first), covering at
/// least `min_docs` documents when available and never more than
/// `max_per_doc` chunks of one document.
pub fn select_diverse_chunks(
    ranked: &[RetrievedChunk],
    target_count: usize,
    min_docs: usize,
    max_per_doc: usize,
) -> Vec<RetrievedChunk> {
    if ranked.is_empty() || target_count == 0 || max_per_doc == 0 {
        return Vec::new();
    }

    let mut taken = vec![false; ranked.len()];
    let mut selected: Vec<usize> = Vec::new();
    let mut per_doc: HashMap<&str, usize> = HashMap::new();

    // Best chunk of each newly seen document.
    for (i, chunk) in ranked.iter().enumerate() {
        if per_doc.len() >= min_docs || selected.len() >= target_count {
            break;
        }
        if !per_doc.contains_key(chunk.document_id.as_str()) {
            per_doc.insert(&chunk.document_id, 1);
            taken[i] = true;
            selected.push(i);
        }
    }

    // Fill by relevance under the per-document cap.
    for (i, chunk) in ranked.iter().enumerate() {
        if selected.len() >= target_count {
            break;
        }
        if taken[i] {
            continue;
        }
        let count = per_doc.entry(&chunk.document_id).or_insert(0);
        if *count < max_per_doc {
            *count += 1;
            taken[i] = true;
            selected.push(i);
        }
    }

    let mut chunks: Vec<RetrievedChunk> = selected.into_iter().map(|i| ranked[i].clone()).collect();
    chunks.sort_by(compare_relevance);
    chunks
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    reranker: Arc<RerankerHandle>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        reranker: Arc<RerankerHandle>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top chunks for `query`, reranked and cut to `rerank_top_k`.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        rerank_top_k: Option<usize>,
    ) -> Result<RetrievalResult, CitelineError> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let rerank_top_k = rerank_top_k.unwrap_or(self.config.rerank_top_k);

        let (candidates, embedding_time_ms, retrieval_time_ms) =
            self.similarity_search(query, top_k)?;
        if candidates.is_empty() {
            return Ok(RetrievalResult::empty(query, embedding_time_ms, retrieval_time_ms));
        }

        let total_retrieved = candidates.len();
        let start = Instant::now();
        let chunks = self.rerank(query, candidates, rerank_top_k)?;
        let rerank_time_ms = elapsed_ms(start);

        info!(
            candidates = total_retrieved,
            kept = chunks.len(),
            embed_ms = embedding_time_ms,
            search_ms = retrieval_time_ms,
            rerank_ms = rerank_time_ms,
            "Retrieved chunks"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            chunks,
            total_retrieved,
            embedding_time_ms,
            retrieval_time_ms,
            rerank_time_ms,
        })
    }

    /// Retrieval for aggregate questions: a wider candidate pool, all of it
    /// reranked, then document-diverse selection.
    pub fn retrieve_from_multiple_documents(
        &self,
        query: &str,
        top_k: Option<usize>,
        rerank_top_k: Option<usize>,
        min_docs: usize,
        max_chunks_per_doc: usize,
    ) -> Result<RetrievalResult, CitelineError> {
        let extended_top_k = top_k.unwrap_or(self.config.top_k) * MULTI_DOC_CANDIDATE_FACTOR;
        let target_count = rerank_top_k.unwrap_or(self.config.rerank_top_k);

        let (candidates, embedding_time_ms, retrieval_time_ms) =
            self.similarity_search(query, extended_top_k)?;
        if candidates.is_empty() {
            return Ok(RetrievalResult::empty(query, embedding_time_ms, retrieval_time_ms));
        }

        let total_retrieved = candidates.len();
        let start = Instant::now();
        let ranked = self.rerank(query, candidates, total_retrieved)?;
        let rerank_time_ms = elapsed_ms(start);

        let chunks = select_diverse_chunks(&ranked, target_count, min_docs, max_chunks_per_doc);
        let result = RetrievalResult {
            query: query.to_string(),
            chunks,
            total_retrieved,
            embedding_time_ms,
            retrieval_time_ms,
            rerank_time_ms,
        };

        info!(
            candidates = total_retrieved,
            kept = result.chunks.len(),
            documents = result.document_count(),
            embed_ms = embedding_time_ms,
            search_ms = retrieval_time_ms,
            rerank_ms = rerank_time_ms,
            "Multi-document retrieval"
        );
        Ok(result)
    }

    fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(Vec<RetrievedChunk>, u64, u64), CitelineError> {
        let start = Instant::now();
        let embedding = self.embedder.embed_one(query)?;
        let embedding_time_ms = elapsed_ms(start);

        let start = Instant::now();
        let hits = self.store.query(&embedding, top_k)?;
        let retrieval_time_ms = elapsed_ms(start);

        debug!(hits = hits.len(), top_k, "Vector search complete");
        let candidates = hits.into_iter().map(RetrievedChunk::from_hit).collect();
        Ok((candidates, embedding_time_ms, retrieval_time_ms))
    }

    fn rerank(
        &self,
        query: &str,
        mut chunks: Vec<RetrievedChunk>,
        keep: usize,
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        if chunks.is_empty() {
            return Ok(chunks);
        }

        let pairs: Vec<(&str, &str)> = chunks.iter().map(|c| (query, c.content.as_str())).collect();
        let raw_scores = self.reranker.predict(&pairs)?;
        if raw_scores.len() != chunks.len() {
            return Err(ProviderError::invalid_response(format!(
                "reranker returned {} scores for {} pairs",
                raw_scores.len(),
                chunks.len()
            )));
        }

        for (chunk, raw) in chunks.iter_mut().zip(raw_scores) {
            chunk.relevance_score = normalize_score(raw);
        }
        chunks.sort_by(compare_relevance);
        chunks.truncate(keep);
        Ok(chunks)
    }
}
