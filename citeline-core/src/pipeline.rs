//! End-to-end question answering over the indexed documents.

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::CitelineError;
use crate::models::Response;
use crate::rag::{Generator, QueryStrategy, RetrievalResult, Retriever};

/// A generated response together with the retrieval that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub response: Response,
    pub retrieval: RetrievalResult,
    pub strategy: QueryStrategy,
}

impl Answer {
    /// Time spent after retrieval, mostly the chat call.
    pub fn generation_time_ms(&self) -> u64 {
        self.response
            .metadata
            .processing_time_ms
            .saturating_sub(self.retrieval.total_time_ms())
    }

    /// Per-stage timings, as appended to verbose JSON output.
    pub fn timing_json(&self) -> Value {
        json!({
            "embedding_ms": self.retrieval.embedding_time_ms,
            "search_ms": self.retrieval.retrieval_time_ms,
            "rerank_ms": self.retrieval.rerank_time_ms,
            "total_retrieval_ms": self.retrieval.total_time_ms(),
            "total_ms": self.response.metadata.processing_time_ms,
        })
    }
}

pub struct RagPipeline {
    retriever: Retriever,
    generator: Generator,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, generator: Generator) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Retrieve and answer `question`.
    ///
    /// Aggregate questions ("list all ...", "how many ...") draw chunks from
    /// several documents; everything else uses plain reranked retrieval.
    /// `max_sources` falls back to `generation.max_sources`.
    pub fn ask(&self, question: &str, max_sources: Option<usize>) -> Result<Answer, CitelineError> {
        let strategy = QueryStrategy::classify(question);
        let retrieval_config = self.retriever.config();
        debug!(strategy = ?strategy, "Classified question");

        let retrieval = match strategy {
            QueryStrategy::Aggregated => self.retriever.retrieve_from_multiple_documents(
                question,
                None,
                None,
                retrieval_config.min_docs,
                retrieval_config.max_chunks_per_doc,
            )?,
            QueryStrategy::Standard => self.retriever.retrieve(question, None, None)?,
        };

        let max_sources = max_sources.unwrap_or(self.generator.config().max_sources);
        let response = self.generator.generate(question, &retrieval, max_sources)?;

        info!(
            not_found = response.not_found,
            citations = response.citations.len(),
            total_ms = response.metadata.processing_time_ms,
            "Answered question"
        );
        Ok(Answer {
            response,
            retrieval,
            strategy,
        })
    }
}
