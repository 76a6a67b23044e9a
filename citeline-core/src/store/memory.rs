//! In-memory stores guarded by `RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{MetadataStore, VectorHit, VectorStore, check_dimensions, l2_distance, nearest};
use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentStatus, StoredMetadata};

#[derive(Debug, Clone)]
struct StoredChunk {
    content: String,
    embedding: Vec<f32>,
    metadata: StoredMetadata,
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<String, StoredChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize, StoreError> {
        let mut stored = self.chunks.write().map_err(|_| StoreError::Poisoned)?;
        let mut dims = stored.values().next().map(|c| c.embedding.len());
        for chunk in chunks {
            if chunk.embedding.is_empty() {
                return Err(StoreError::MissingEmbedding {
                    id: chunk.id.clone(),
                });
            }
            match dims {
                Some(expected) => check_dimensions(expected, chunk.embedding.len())?,
                None => dims = Some(chunk.embedding.len()),
            }
        }
        for chunk in chunks {
            stored.insert(
                chunk.id.clone(),
                StoredChunk {
                    content: chunk.content.clone(),
                    embedding: chunk.embedding.clone(),
                    metadata: chunk.stored_metadata(),
                },
            );
        }
        Ok(chunks.len())
    }

    fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<VectorHit>, StoreError> {
        let stored = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        let mut hits = Vec::with_capacity(stored.len());
        for (id, chunk) in stored.iter() {
            check_dimensions(chunk.embedding.len(), embedding.len())?;
            hits.push(VectorHit {
                id: id.clone(),
                content: chunk.content.clone(),
                distance: l2_distance(&chunk.embedding, embedding),
                metadata: chunk.metadata.clone(),
            });
        }
        Ok(nearest(hits, n_results))
    }

    fn delete_by_document_id(&self, document_id: &str) -> Result<usize, StoreError> {
        let mut stored = self.chunks.write().map_err(|_| StoreError::Poisoned)?;
        let before = stored.len();
        stored.retain(|_, c| c.metadata.document_id != document_id);
        Ok(before - stored.len())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut stored = self.chunks.write().map_err(|_| StoreError::Poisoned)?;
        let count = stored.len();
        stored.clear();
        Ok(count)
    }

    fn get_count(&self) -> Result<usize, StoreError> {
        Ok(self.chunks.read().map_err(|_| StoreError::Poisoned)?.len())
    }

    fn storage_size_bytes(&self) -> u64 {
        0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn add(&self, document: &Document) -> Result<(), StoreError> {
        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        docs.retain(|_, d| d.file_path != document.file_path);
        docs.insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn update(&self, document: &Document) -> Result<(), StoreError> {
        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        match docs.get_mut(&document.id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(StoreError::DocumentNotFound {
                id: document.id.clone(),
            }),
        }
    }

    fn get_by_path(&self, file_path: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.documents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.values().find(|d| d.file_path == file_path).cloned())
    }

    fn count(&self, status: Option<DocumentStatus>) -> Result<usize, StoreError> {
        let docs = self.documents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs
            .values()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .count())
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.read().map_err(|_| StoreError::Poisoned)?;
        let mut recent: Vec<Document> = docs.values().cloned().collect();
        recent.sort_by(|a, b| b.indexed_at.cmp(&a.indexed_at).then_with(|| a.name.cmp(&b.name)));
        recent.truncate(limit);
        Ok(recent)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut docs = self.documents.write().map_err(|_| StoreError::Poisoned)?;
        let count = docs.len();
        docs.clear();
        Ok(count)
    }

    fn storage_size_bytes(&self) -> u64 {
        0
    }
}
