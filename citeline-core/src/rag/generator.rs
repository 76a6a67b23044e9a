//! Grounded answer generation.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::grounding::{ModelAnswer, confidence_score, resolve_citations};
use super::intent::QueryStrategy;
use super::prompts;
use super::retriever::RetrievalResult;
use crate::config::GenerationConfig;
use crate::error::ProviderError;
use crate::models::{Response, ResponseMetadata};
use crate::providers::ChatProvider;

pub struct Generator {
    chat: Arc<dyn ChatProvider>,
    config: GenerationConfig,
}

impl Generator {
    pub fn new(chat: Arc<dyn ChatProvider>, config: GenerationConfig) -> Self {
        Self { chat, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Answer `query` from the best `max_sources` retrieved chunks.
    ///
    /// Malformed model output never fails; only the chat call itself can.
    /// `processing_time_ms` covers retrieval plus generation.
    pub fn generate(
        &self,
        query: &str,
        retrieval: &RetrievalResult,
        max_sources: usize,
    ) -> Result<Response, ProviderError> {
        let start = Instant::now();
        let total_ms = |start: Instant| retrieval.total_time_ms() + start.elapsed().as_millis() as u64;

        let chunks = &retrieval.chunks[..max_sources.min(retrieval.chunks.len())];
        if chunks.is_empty() {
            return Ok(Response::not_found(
                query,
                retrieval.total_retrieved,
                total_ms(start),
            ));
        }

        if let Some(floor) = self.config.relevance_floor
            && chunks[0].relevance_score < floor
        {
            debug!(
                top_score = chunks[0].relevance_score,
                floor, "Best chunk below relevance floor"
            );
            return Ok(Response::not_found(
                query,
                retrieval.total_retrieved,
                total_ms(start),
            ));
        }

        let strategy = QueryStrategy::classify(query);
        let context = prompts::format_sources(chunks);
        let (system_prompt, user_message) = match strategy {
            QueryStrategy::Standard => (
                prompts::GROUNDED_SYSTEM_PROMPT,
                prompts::grounded_user_message(query, &context),
            ),
            QueryStrategy::Aggregated => (
                prompts::AGGREGATED_SYSTEM_PROMPT,
                prompts::aggregated_user_message(query, &context),
            ),
        };

        let raw = self.chat.chat(
            system_prompt,
            &user_message,
            self.config.temperature,
            self.config.max_tokens,
        )?;
        let parsed = ModelAnswer::parse_lenient(&raw);

        if parsed.not_found {
            return Ok(Response::not_found(
                query,
                retrieval.total_retrieved,
                total_ms(start),
            ));
        }

        let (citations, quotes_verified) = resolve_citations(&parsed.citations, chunks);
        let confidence = confidence_score(chunks, &citations);

        info!(
            strategy = ?strategy,
            sources = chunks.len(),
            citations = citations.len(),
            quotes_verified,
            confidence,
            "Generated answer"
        );

        Ok(Response {
            answer: parsed.answer,
            query_text: query.to_string(),
            metadata: ResponseMetadata {
                chunks_retrieved: retrieval.total_retrieved,
                chunks_used: citations.len(),
                processing_time_ms: total_ms(start),
                confidence_score: confidence,
                quotes_verified,
            },
            citations,
            not_found: false,
        })
    }
}
