//! Configuration system for Citeline.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment. Configuration
//! is loaded once at startup and shared read-only afterwards.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitelineConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// OpenAI-compatible embedding and chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API, including the version segment.
    pub base_url: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Where embeddings come from. Chat always uses the API.
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    /// Dimensionality of `embedding_model` vectors.
    pub embedding_dimensions: usize,
    pub chat_model: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            embedding_backend: EmbeddingBackend::Api,
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimensions: 3072,
            chat_model: "gpt-4o".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Which embedder backs indexing and retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// `embedding_model` on the configured API.
    #[default]
    Api,
    /// Local term hashing into `embedding_dimensions` buckets. Works offline
    /// but only matches on shared words.
    Hashing,
}

/// Which cross-encoder implementation backs the reranker handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerBackend {
    /// A text-embeddings-inference style `/rerank` endpoint.
    #[default]
    Http,
    /// Local ONNX model through fastembed (requires the `reranker` feature).
    FastEmbed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub backend: RerankerBackend,
    /// Endpoint for the HTTP backend.
    pub url: String,
    /// Model name. The fastembed backend accepts only the names in
    /// `FASTEMBED_RERANKERS`.
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::Http,
            url: "http://localhost:8080".to_string(),
            model: "cross-encoder/ms-marco-MiniLM-L-12-v2".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates fetched from the vector store.
    pub top_k: usize,
    /// Chunks kept after reranking.
    pub rerank_top_k: usize,
    /// Distinct documents sought for aggregate queries.
    pub min_docs: usize,
    /// Per-document cap for aggregate queries.
    pub max_chunks_per_doc: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 50,
            rerank_top_k: 10,
            min_docs: 2,
            max_chunks_per_doc: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Chunks passed to the model as sources.
    pub max_sources: usize,
    pub temperature: f32,
    pub max_tokens: usize,
    /// When set, answer "not found" if the best chunk scores below this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_floor: Option<f64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_sources: 5,
            temperature: 0.0,
            max_tokens: 4096,
            relevance_floor: None,
        }
    }
}

/// Chunking limits, all measured in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Largest page sent to the model for semantic chunking.
    pub max_semantic_input_chars: usize,
    /// Cap for paragraph-accumulated fallback chunks.
    pub fallback_chunk_chars: usize,
    pub min_chunk_chars: usize,
    /// Chunks above this are re-split before embedding.
    pub max_embedding_chars: usize,
    pub embedding_batch_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_semantic_input_chars: 12_000,
            fallback_chunk_chars: 2_000,
            min_chunk_chars: crate::models::chunk::MIN_CHUNK_CHARS,
            max_embedding_chars: 24_000,
            embedding_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub vector_db: String,
    pub metadata_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            vector_db: "vectors.db".to_string(),
            metadata_db: "metadata.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.vector_db)
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_db)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

impl CitelineConfig {
    /// Reject settings the pipeline cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be positive");
        }
        if self.retrieval.rerank_top_k == 0 {
            return invalid("retrieval.rerank_top_k must be positive");
        }
        if self.retrieval.max_chunks_per_doc == 0 {
            return invalid("retrieval.max_chunks_per_doc must be positive");
        }
        if self.chunking.embedding_batch_size == 0 {
            return invalid("chunking.embedding_batch_size must be positive");
        }
        if self.chunking.min_chunk_chars > self.chunking.fallback_chunk_chars {
            return invalid("chunking.min_chunk_chars exceeds chunking.fallback_chunk_chars");
        }
        if self.chunking.fallback_chunk_chars > self.chunking.max_embedding_chars {
            return invalid("chunking.fallback_chunk_chars exceeds chunking.max_embedding_chars");
        }
        if self.provider.embedding_dimensions == 0 {
            return invalid("provider.embedding_dimensions must be positive");
        }
        if let Some(floor) = self.generation.relevance_floor
            && !(0.0..=1.0).contains(&floor)
        {
            return invalid("generation.relevance_floor must be within [0, 1]");
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `CITELINE_`, `__` for nesting)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.citeline/config.toml`)
/// 4. User config (`~/.config/citeline/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<CitelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(CitelineConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "citeline", "citeline") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".citeline").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // CITELINE_RETRIEVAL__TOP_K, CITELINE_PROVIDER__CHAT_MODEL, ...
    figment = figment.merge(Env::prefixed("CITELINE_").split("__"));

    let config: CitelineConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CitelineConfig::default();
        assert_eq!(config.retrieval.top_k, 50);
        assert_eq!(config.retrieval.rerank_top_k, 10);
        assert_eq!(config.generation.max_sources, 5);
        assert_eq!(config.chunking.max_embedding_chars, 24_000);
        assert_eq!(config.chunking.embedding_batch_size, 50);
        assert!(config.generation.relevance_floor.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedding_backend_from_toml() {
        let provider = r#"
[provider]
base_url = "http://localhost:11434/v1"
api_key_env = "K"
embedding_model = "none"
embedding_dimensions = 256
chat_model = "llama3"
timeout_secs = 30
"#;
        let defaulted: CitelineConfig = toml::from_str(provider).unwrap();
        assert_eq!(defaulted.provider.embedding_backend, EmbeddingBackend::Api);

        let offline = format!("{provider}embedding_backend = \"hashing\"\n");
        let config: CitelineConfig = toml::from_str(&offline).unwrap();
        assert_eq!(config.provider.embedding_backend, EmbeddingBackend::Hashing);
        assert_eq!(config.provider.embedding_dimensions, 256);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = CitelineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: CitelineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retrieval]\ntop_k = 20\nrerank_top_k = 4\nmin_docs = 3\nmax_chunks_per_doc = 1\n\n[reranker]\nbackend = \"fastembed\"\nurl = \"http://x\"\nmodel = \"m\"\ntimeout_secs = 5"
        )
        .unwrap();
        let config = load_config(None, Some(file.path())).unwrap();
        assert_eq!(config.retrieval.top_k, 20);
        assert_eq!(config.retrieval.rerank_top_k, 4);
        assert_eq!(config.reranker.backend, RerankerBackend::FastEmbed);
        assert_eq!(config.generation.max_sources, 5);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = load_config(None, Some(Path::new("/nonexistent/citeline.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = CitelineConfig::default();
        config.retrieval.top_k = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_floor() {
        let mut config = CitelineConfig::default();
        config.generation.relevance_floor = Some(1.5);
        assert!(config.validate().is_err());
        config.generation.relevance_floor = Some(0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/var/citeline"),
            ..Default::default()
        };
        assert_eq!(
            storage.vector_db_path(),
            PathBuf::from("/var/citeline/vectors.db")
        );
        assert_eq!(
            storage.metadata_db_path(),
            PathBuf::from("/var/citeline/metadata.db")
        );
    }
}
