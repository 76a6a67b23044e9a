//! Chunk vector storage and document metadata storage.
//!
//! Two backends for each trait: in-memory (tests, ephemeral runs) and
//! SQLite via `rusqlite` (persistent). Vector search is exact L2 distance
//! over every stored embedding.

pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentStatus, StoredMetadata};

pub use memory::{InMemoryMetadataStore, InMemoryVectorStore};
pub use sqlite::{SqliteMetadataStore, SqliteVectorStore};

/// A nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub content: String,
    /// Euclidean distance to the query; lower is closer.
    pub distance: f32,
    pub metadata: StoredMetadata,
}

pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks. Every chunk must carry an embedding.
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize, StoreError>;

    /// The `n_results` nearest chunks, closest first.
    fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<VectorHit>, StoreError>;

    fn delete_by_document_id(&self, document_id: &str) -> Result<usize, StoreError>;

    /// Remove everything, returning how many chunks were deleted.
    fn delete_all(&self) -> Result<usize, StoreError>;

    fn get_count(&self) -> Result<usize, StoreError>;

    fn storage_size_bytes(&self) -> u64;
}

pub trait MetadataStore: Send + Sync {
    /// Insert a document, replacing any record with the same file path.
    fn add(&self, document: &Document) -> Result<(), StoreError>;

    /// Overwrite an existing document by id.
    fn update(&self, document: &Document) -> Result<(), StoreError>;

    fn get_by_path(&self, file_path: &str) -> Result<Option<Document>, StoreError>;

    /// Number of documents, optionally restricted to one status.
    fn count(&self, status: Option<DocumentStatus>) -> Result<usize, StoreError>;

    /// Most recently indexed documents first.
    fn get_recent(&self, limit: usize) -> Result<Vec<Document>, StoreError>;

    fn delete_all(&self) -> Result<usize, StoreError>;

    fn storage_size_bytes(&self) -> u64;
}

pub(crate) fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Order hits closest first (ties by id) and keep `n`.
pub(crate) fn nearest(mut hits: Vec<VectorHit>, n: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(n);
    hits
}

pub(crate) fn check_dimensions(expected: usize, actual: usize) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::DimensionMismatch { expected, actual })
    }
}
