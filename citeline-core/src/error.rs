//! Error types for the Citeline core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering model providers, storage, configuration and page extraction.

use std::path::PathBuf;

/// Top-level error type for the Citeline core library.
#[derive(Debug, thiserror::Error)]
pub enum CitelineError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from embedding, chat and reranking collaborators.
///
/// Callers pattern-match on the kind to pick a recovery policy; the core
/// itself never retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Network request failed: {message}")]
    Network { message: String },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid response from provider: {message}")]
    InvalidResponse { message: String },

    #[error("Model unavailable: {message}")]
    ModelUnavailable { message: String },
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Whether the failure is transient and a caller-side retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Errors from the vector and metadata stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Chunk {id} has no embedding")]
    MissingEmbedding { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Corrupt record: {message}")]
    Corrupt { message: String },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}

/// Errors from the page source collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Password protected: {path}")]
    PasswordProtected { path: PathBuf },

    #[error("Unable to read document (corrupted): {path}")]
    Corrupted { path: PathBuf },

    #[error("No extracted text available for {path}")]
    MissingText { path: PathBuf },

    #[error("Extraction failed for {path}: {message}")]
    Failed { path: PathBuf, message: String },
}

/// A type alias for results using the top-level `CitelineError`.
pub type Result<T> = std::result::Result<T, CitelineError>;
