//! OpenAI-compatible embeddings and chat provider.
//!
//! Works against OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio and any
//! endpoint that follows the `/embeddings` and `/chat/completions` formats.

use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatProvider, Embedder};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

const PROVIDER_NAME: &str = "openai-compatible";

/// Seconds to wait on a 429 that names no retry interval.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    embedding_dimensions: usize,
    chat_model: String,
}

impl OpenAiCompatibleProvider {
    /// Create a provider from configuration.
    ///
    /// Reads the API key from `config.api_key_env`. Local endpoints
    /// (localhost, 127.0.0.1) accept a placeholder key.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let is_local =
            config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using placeholder bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| ProviderError::Auth {
                provider: format!("{PROVIDER_NAME}: env var '{}' not set", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a provider with an API key resolved by the caller.
    pub fn new_with_key(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        debug!(
            base_url = %config.base_url,
            embedding_model = %config.embedding_model,
            chat_model = %config.chat_model,
            "Initialized OpenAI-compatible provider"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            embedding_model: config.embedding_model.clone(),
            embedding_dimensions: config.embedding_dimensions,
            chat_model: config.chat_model.clone(),
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response.text().unwrap_or_default();
            return Err(map_http_error(status.as_u16(), retry_after.as_deref(), &text));
        }

        Ok(response.json::<Value>()?)
    }
}

impl Embedder for OpenAiCompatibleProvider {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ProviderError::invalid_response("empty embeddings response"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let response = self.post("/embeddings", &body)?;
        let embeddings = parse_embeddings_response(&response, texts.len())?;
        if let Some(first) = embeddings.first()
            && first.len() != self.embedding_dimensions
        {
            warn!(
                expected = self.embedding_dimensions,
                actual = first.len(),
                "Embedding dimensions differ from configuration"
            );
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.embedding_dimensions
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }
}

impl ChatProvider for OpenAiCompatibleProvider {
    fn chat(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let response = self.post("/chat/completions", &body)?;
        parse_chat_response(&response)
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }
}

/// Extract vectors from an `/embeddings` body, ordered by their `index`.
fn parse_embeddings_response(
    body: &Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::invalid_response("missing `data` array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::invalid_response("missing `embedding` array"))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ProviderError::invalid_response("non-numeric embedding value"))
            })
            .collect::<Result<Vec<f32>, _>>()?;
        indexed.push((index, vector));
    }

    if indexed.len() != expected {
        return Err(ProviderError::invalid_response(format!(
            "expected {expected} embeddings, got {}",
            indexed.len()
        )));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_chat_response(body: &Value) -> Result<String, ProviderError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::invalid_response("missing choices[0].message.content"))
}

/// Map a non-success HTTP status to a provider error kind.
fn map_http_error(status: u16, retry_after: Option<&str>, body: &str) -> ProviderError {
    match status {
        401 | 403 => {
            debug!(body = %body, status, "Authentication failed");
            ProviderError::Auth {
                provider: PROVIDER_NAME.to_string(),
            }
        }
        404 if body.contains("model") => ProviderError::ModelUnavailable {
            message: body.to_string(),
        },
        429 => {
            let retry_after_secs = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .or_else(|| retry_after_from_body(body))
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            ProviderError::RateLimited { retry_after_secs }
        }
        503 if body.contains("loading") => ProviderError::ModelUnavailable {
            message: body.to_string(),
        },
        s if s >= 500 => ProviderError::network(format!("Server error ({s}): {body}")),
        s => ProviderError::invalid_response(format!("HTTP {s}: {body}")),
    }
}

/// "Rate limit reached ... try again in 20s" -> 20.
fn retry_after_from_body(body: &str) -> Option<u64> {
    let message = serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()?
        .to_string();
    message
        .split("in ")
        .last()
        .and_then(|s| s.trim().trim_end_matches('.').trim_end_matches('s').parse::<u64>().ok())
}
