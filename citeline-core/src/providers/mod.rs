//! Model collaborators: embeddings, chat and cross-encoder scoring.
//!
//! The pipeline only talks to the narrow traits defined here. Concrete
//! implementations:
//! - `OpenAiCompatibleProvider`: embeddings and chat over any OpenAI-style API
//! - `HashingEmbedder`: deterministic local embeddings (`embedding_backend = "hashing"`)
//! - `HttpCrossEncoder` / `FastEmbedCrossEncoder`: rerankers behind `RerankerHandle`
//!
//! Every call is synchronous and blocking; callers own timeouts and retries.

pub mod local;
pub mod openai;
pub mod reranker;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::{EmbeddingBackend, ProviderConfig};
use crate::error::ProviderError;
use crate::rag::prompts;

pub use local::HashingEmbedder;
pub use openai::OpenAiCompatibleProvider;
pub use reranker::{CrossEncoderFactory, HttpCrossEncoder, RerankerHandle};

#[cfg(feature = "reranker")]
pub use reranker::FastEmbedCrossEncoder;

/// The embedder `config.embedding_backend` selects. `api` serves the
/// `Api` backend.
pub fn embedder_for(
    config: &ProviderConfig,
    api: Arc<OpenAiCompatibleProvider>,
) -> Arc<dyn Embedder> {
    match config.embedding_backend {
        EmbeddingBackend::Api => api,
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimensions)),
    }
}

/// Text embedding model.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch, preserving order. Fails as a whole; no partial results.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// One segment proposed by model-assisted semantic chunking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticSegment {
    pub content: String,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub section_title: Option<String>,
}

/// Chat-completion model.
pub trait ChatProvider: Send + Sync {
    fn chat(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String, ProviderError>;

    /// Ask the model for natural-boundary segments of `text`.
    fn chunk_text(
        &self,
        text: &str,
        page_context: &str,
    ) -> Result<Vec<SemanticSegment>, ProviderError> {
        let user_message = prompts::chunking_user_message(text, page_context);
        let raw = self.chat(
            prompts::CHUNKING_SYSTEM_PROMPT,
            &user_message,
            0.0,
            prompts::CHUNKING_MAX_TOKENS,
        )?;
        parse_segments(&raw)
    }

    fn model_name(&self) -> &str;
}

/// Cross-encoder scoring `(query, passage)` pairs jointly.
pub trait CrossEncoder: Send + Sync {
    /// Raw relevance logits, one per pair, in input order.
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Strip a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Parse chunking output: a bare array or `{"chunks": [...]}`.
fn parse_segments(raw: &str) -> Result<Vec<SemanticSegment>, ProviderError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| ProviderError::invalid_response(format!("chunking output: {e}")))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("chunks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProviderError::invalid_response(
                    "chunking output has no `chunks` array",
                ));
            }
        },
        _ => {
            return Err(ProviderError::invalid_response(
                "chunking output is not a JSON array or object",
            ));
        }
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| ProviderError::invalid_response(format!("chunk segment: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedChat {
        reply: String,
        last_user: Mutex<String>,
    }

    impl ChatProvider for CannedChat {
        fn chat(&self, _: &str, user: &str, _: f32, _: usize) -> Result<String, ProviderError> {
            *self.last_user.lock().unwrap() = user.to_string();
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[test]
    fn test_embedder_for_selects_backend() {
        let api = Arc::new(OpenAiCompatibleProvider::new_with_key(&ProviderConfig::default(), "k".into()).unwrap());

        let config = ProviderConfig::default();
        let embedder = embedder_for(&config, api.clone());
        assert_eq!(embedder.provider_name(), api.provider_name());

        let offline = ProviderConfig {
            embedding_backend: EmbeddingBackend::Hashing,
            embedding_dimensions: 48,
            ..Default::default()
        };
        let embedder = embedder_for(&offline, api);
        assert_eq!(embedder.provider_name(), "hashing");
        assert_eq!(embedder.dimensions(), 48);
        assert_eq!(embedder.embed_one("budget report").unwrap().len(), 48);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_segments_object_form() {
        let segments = parse_segments(
            r#"{"chunks":[{"content":"A","has_table":true,"section_title":"Intro"},{"content":"B"}]}"#,
        )
        .unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].has_table);
        assert_eq!(segments[0].section_title.as_deref(), Some("Intro"));
        assert!(!segments[1].has_table);
    }

    #[test]
    fn test_parse_segments_array_form_in_fence() {
        let segments = parse_segments("```json\n[{\"content\":\"only\"}]\n```").unwrap();
        assert_eq!(segments[0].content, "only");
    }

    #[test]
    fn test_parse_segments_rejects_garbage() {
        assert!(matches!(
            parse_segments("Sure! Here are the chunks."),
            Err(ProviderError::InvalidResponse { .. })
        ));
        assert!(parse_segments(r#"{"segments": []}"#).is_err());
    }

    #[test]
    fn test_default_chunk_text_uses_chat() {
        let chat = CannedChat {
            reply: r#"[{"content":"Segment one"}]"#.into(),
            last_user: Mutex::new(String::new()),
        };
        let segments = chat.chunk_text("Body text", "Page 3").unwrap();
        assert_eq!(segments[0].content, "Segment one");
        let sent = chat.last_user.lock().unwrap().clone();
        assert!(sent.contains("Page 3"));
        assert!(sent.contains("Body text"));
    }
}
