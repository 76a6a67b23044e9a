//! # Citeline Core
//!
//! Grounded question answering over a folder of PDFs.
//! Provides chunking, vector retrieval with cross-encoder reranking,
//! citation-checked answer generation, indexing, storage backends
//! and configuration.

pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod rag;
pub mod store;

// Re-export commonly used types at the crate root.
pub use config::{CitelineConfig, load_config};
pub use error::{CitelineError, ExtractionError, ProviderError, Result, StoreError};
pub use indexer::{
    IndexStatus, Indexer, IndexingOutcome, IndexingResult, IndexingSummary, PageSource,
    SidecarTextSource, clear_index,
};
pub use models::{Chunk, Citation, Document, DocumentStatus, ExtractedPage, Response};
pub use pipeline::{Answer, RagPipeline};
pub use providers::{ChatProvider, CrossEncoder, Embedder, RerankerHandle};
pub use rag::{Chunker, Generator, QueryStrategy, RetrievalResult, RetrievedChunk, Retriever};
pub use store::{MetadataStore, VectorStore};
