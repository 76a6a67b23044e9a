//! Cross-encoder rerankers and the shared, lazily loaded handle.
//!
//! Loading a cross-encoder is expensive, so the application owns exactly one
//! `RerankerHandle` (usually behind an `Arc`) and passes it to every retriever.
//! The model is built on first use; concurrent first calls build it once.

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

use super::CrossEncoder;
use crate::config::{RerankerBackend, RerankerConfig};
use crate::error::ProviderError;

/// Builds the cross-encoder on first use.
pub type CrossEncoderFactory =
    Box<dyn Fn() -> Result<Box<dyn CrossEncoder>, ProviderError> + Send + Sync>;

pub struct RerankerHandle {
    factory: CrossEncoderFactory,
    model: OnceLock<Box<dyn CrossEncoder>>,
    init: Mutex<()>,
}

impl RerankerHandle {
    pub fn new(factory: CrossEncoderFactory) -> Self {
        Self {
            factory,
            model: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Wrap an already constructed encoder.
    pub fn from_encoder(encoder: Box<dyn CrossEncoder>) -> Self {
        let handle = Self::new(Box::new(|| {
            Err(ProviderError::ModelUnavailable {
                message: "pre-built cross-encoder cannot be rebuilt".into(),
            })
        }));
        let _ = handle.model.set(encoder);
        handle
    }

    /// Handle whose backend is chosen by configuration. Nothing loads until
    /// the first `predict`.
    pub fn from_config(config: &RerankerConfig) -> Self {
        let config = config.clone();
        Self::new(Box::new(move || -> Result<Box<dyn CrossEncoder>, ProviderError> {
            match config.backend {
                RerankerBackend::Http => Ok(Box::new(HttpCrossEncoder::new(&config)?)),
                #[cfg(feature = "reranker")]
                RerankerBackend::FastEmbed => Ok(Box::new(FastEmbedCrossEncoder::new(&config.model)?)),
                #[cfg(not(feature = "reranker"))]
                RerankerBackend::FastEmbed => Err(ProviderError::ModelUnavailable {
                    message: "fastembed backend requires the `reranker` feature".into(),
                }),
            }
        }))
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// The loaded encoder, building it if this is the first use.
    ///
    /// A failed build is not cached; the next call tries again.
    pub fn get(&self) -> Result<&dyn CrossEncoder, ProviderError> {
        if let Some(model) = self.model.get() {
            return Ok(model.as_ref());
        }

        let _guard = self
            .init
            .lock()
            .map_err(|_| ProviderError::ModelUnavailable {
                message: "reranker initialisation lock poisoned".into(),
            })?;

        if let Some(model) = self.model.get() {
            return Ok(model.as_ref());
        }

        info!("Loading cross-encoder");
        let encoder = (self.factory)()?;
        info!(model = encoder.model_name(), "Cross-encoder ready");
        let _ = self.model.set(encoder);

        self.model
            .get()
            .map(|m| m.as_ref())
            .ok_or_else(|| ProviderError::ModelUnavailable {
                message: "cross-encoder failed to register".into(),
            })
    }

    pub fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        self.get()?.predict(pairs)
    }
}

impl std::fmt::Debug for RerankerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerankerHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Cross-encoder served by a text-embeddings-inference style `/rerank` API.
pub struct HttpCrossEncoder {
    client: Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(config: &RerankerConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/rerank", config.url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    fn score_group(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "query": query,
            "texts": texts,
            "raw_scores": true,
            "return_text": false,
        });
        let response = self.client.post(&self.url).json(&body).send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(match status.as_u16() {
                503 => ProviderError::ModelUnavailable { message: text },
                s if s >= 500 => ProviderError::network(format!("Server error ({s}): {text}")),
                s => ProviderError::invalid_response(format!("HTTP {s}: {text}")),
            });
        }
        let scores: Vec<RerankScore> = response.json()?;
        scores_in_input_order(scores, texts.len())
    }
}

/// Reorder `/rerank` results (sorted by score) back to input order.
fn scores_in_input_order(
    scores: Vec<RerankScore>,
    expected: usize,
) -> Result<Vec<f32>, ProviderError> {
    let mut ordered: Vec<Option<f32>> = vec![None; expected];
    for s in scores {
        match ordered.get_mut(s.index) {
            Some(slot) => *slot = Some(s.score),
            None => {
                return Err(ProviderError::invalid_response(format!(
                    "rerank index {} out of range",
                    s.index
                )));
            }
        }
    }
    ordered
        .into_iter()
        .map(|s| s.ok_or_else(|| ProviderError::invalid_response("rerank response missing a score")))
        .collect()
}

impl CrossEncoder for HttpCrossEncoder {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError> {
        let mut out = Vec::with_capacity(pairs.len());
        // One request per run of pairs sharing a query.
        let mut start = 0;
        while start < pairs.len() {
            let query = pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|(q, _)| *q != query)
                .map_or(pairs.len(), |offset| start + offset);
            let texts: Vec<&str> = pairs[start..end].iter().map(|(_, t)| *t).collect();
            debug!(pairs = texts.len(), "Scoring rerank group");
            out.extend(self.score_group(query, &texts)?);
            start = end;
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Models the fastembed backend can load, by hub name.
pub const FASTEMBED_RERANKERS: [&str; 3] = [
    "BAAI/bge-reranker-base",
    "BAAI/bge-reranker-v2-m3",
    "jinaai/jina-reranker-v1-turbo-en",
];

/// Local ONNX cross-encoder via fastembed.
#[cfg(feature = "reranker")]
pub struct FastEmbedCrossEncoder {
    model: Mutex<fastembed::TextRerank>,
    name: String,
}

#[cfg(feature = "reranker")]
impl FastEmbedCrossEncoder {
    pub fn new(model_name: &str) -> Result<Self, ProviderError> {
        use fastembed::{RerankInitOptions, RerankerModel};

        let model = match model_name {
            "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jinaai/jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            other => {
                return Err(ProviderError::ModelUnavailable {
                    message: format!(
                        "unknown fastembed reranker `{other}` (supported: {})",
                        FASTEMBED_RERANKERS.join(", ")
                    ),
                });
            }
        };
        let reranker = fastembed::TextRerank::try_new(RerankInitOptions::new(model)).map_err(
            |e| ProviderError::ModelUnavailable {
                message: e.to_string(),
            },
        )?;
        Ok(Self {
            model: Mutex::new(reranker),
            name: model_name.to_string(),
        })
    }
}

#[cfg(feature = "reranker")]
impl CrossEncoder for FastEmbedCrossEncoder {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| ProviderError::ModelUnavailable {
                message: "fastembed reranker lock poisoned".into(),
            })?;
        let mut out = vec![0.0f32; pairs.len()];
        let mut start = 0;
        while start < pairs.len() {
            let query = pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|(q, _)| *q != query)
                .map_or(pairs.len(), |offset| start + offset);
            let documents: Vec<&str> = pairs[start..end].iter().map(|(_, t)| *t).collect();
            let results = model
                .rerank(query, &documents, false, None)
                .map_err(|e| ProviderError::invalid_response(e.to_string()))?;
            for r in results {
                if let Some(slot) = out.get_mut(start + r.index) {
                    *slot = r.score;
                }
            }
            start = end;
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEncoder;

    impl CrossEncoder for LengthEncoder {
        fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError> {
            Ok(pairs.iter().map(|(_, p)| p.len() as f32).collect())
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    fn counting_handle(counter: Arc<AtomicUsize>) -> RerankerHandle {
        RerankerHandle::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LengthEncoder) as Box<dyn CrossEncoder>)
        }))
    }

    #[test]
    fn test_lazy_initialisation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(counter.clone());
        assert!(!handle.is_loaded());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let scores = handle.predict(&[("q", "ab"), ("q", "abcd")]).unwrap();
        assert_eq!(scores, vec![2.0, 4.0]);
        assert!(handle.is_loaded());
        handle.predict(&[("q", "x")]).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(counting_handle(counter.clone()));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let handle = handle.clone();
                s.spawn(move || handle.predict(&[("q", "passage")]).unwrap());
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_build_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let handle = RerankerHandle::new(Box::new(move || {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::ModelUnavailable {
                    message: "downloading".into(),
                })
            } else {
                Ok(Box::new(LengthEncoder) as Box<dyn CrossEncoder>)
            }
        }));
        assert!(handle.predict(&[("q", "p")]).is_err());
        assert!(handle.predict(&[("q", "p")]).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_pairs_do_not_load() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = counting_handle(counter.clone());
        assert!(handle.predict(&[]).unwrap().is_empty());
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_from_encoder_is_loaded() {
        let handle = RerankerHandle::from_encoder(Box::new(LengthEncoder));
        assert!(handle.is_loaded());
        assert_eq!(handle.get().unwrap().model_name(), "length");
    }

    #[cfg(not(feature = "reranker"))]
    #[test]
    fn test_fastembed_backend_without_feature() {
        let config = RerankerConfig {
            backend: RerankerBackend::FastEmbed,
            ..Default::default()
        };
        let handle = RerankerHandle::from_config(&config);
        assert!(matches!(
            handle.predict(&[("q", "p")]),
            Err(ProviderError::ModelUnavailable { .. })
        ));
    }

    #[cfg(feature = "reranker")]
    #[test]
    fn test_fastembed_rejects_unknown_model() {
        let result = FastEmbedCrossEncoder::new("cross-encoder/ms-marco-MiniLM-L-12-v2");
        match result {
            Err(ProviderError::ModelUnavailable { message }) => {
                assert!(message.contains("ms-marco-MiniLM-L-12-v2"));
                assert!(message.contains("BAAI/bge-reranker-base"));
            }
            _ => panic!("expected ModelUnavailable"),
        }
    }

    #[cfg(feature = "reranker")]
    #[test]
    fn test_fastembed_handle_with_unknown_model_stays_unloaded() {
        let config = RerankerConfig {
            backend: RerankerBackend::FastEmbed,
            model: "acme/not-a-reranker".into(),
            ..Default::default()
        };
        let handle = RerankerHandle::from_config(&config);
        assert!(matches!(
            handle.predict(&[("q", "p")]),
            Err(ProviderError::ModelUnavailable { .. })
        ));
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_scores_in_input_order() {
        let scores = vec![
            RerankScore {
                index: 1,
                score: 3.5,
            },
            RerankScore {
                index: 0,
                score: -1.0,
            },
        ];
        assert_eq!(scores_in_input_order(scores, 2).unwrap(), vec![-1.0, 3.5]);
        assert!(scores_in_input_order(Vec::new(), 1).is_err());
        assert!(
            scores_in_input_order(
                vec![RerankScore {
                    index: 5,
                    score: 0.0
                }],
                1
            )
            .is_err()
        );
    }
}
