//! Document chunks.

use serde::{Deserialize, Serialize};

/// Minimum trimmed length of any stored chunk.
pub const MIN_CHUNK_CHARS: usize = 50;

/// Marker inserted around tables by the page source.
pub const TABLE_MARKER: &str = "[Table]";

/// How a chunk's content was extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    #[default]
    Text,
    Table,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

/// Extra information recorded alongside a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub has_table: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default)]
    pub extraction_method: ExtractionMethod,
}

/// A semantically bounded slice of document text plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    /// 1-based source page.
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    /// 0-based position within the document.
    pub chunk_index: usize,
    #[serde(default)]
    pub token_count: usize,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(
        document_id: impl Into<String>,
        document_name: impl Into<String>,
        content: impl Into<String>,
        page_number: u32,
        chunk_index: usize,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            document_name: document_name.into(),
            content: content.into(),
            page_number,
            page_end: None,
            chunk_index,
            token_count: 0,
            embedding: Vec::new(),
            metadata,
        }
    }

    /// Whether `content` is long enough to be worth keeping as a chunk.
    pub fn is_substantial(content: &str, min_chars: usize) -> bool {
        content.trim().chars().count() >= min_chars
    }

    /// Rough token estimate at ~4 characters per token.
    pub fn estimate_tokens(&mut self) -> usize {
        self.token_count = self.content.chars().count() / 4;
        self.token_count
    }

    /// Metadata persisted next to the vector in the store.
    pub fn stored_metadata(&self) -> StoredMetadata {
        StoredMetadata {
            document_id: self.document_id.clone(),
            document_name: self.document_name.clone(),
            page_number: self.page_number,
            page_end: self.page_end,
            chunk_index: self.chunk_index,
            has_table: self.metadata.has_table,
            section_title: self.metadata.section_title.clone(),
            extraction_method: self.metadata.extraction_method,
        }
    }
}

/// Flat chunk metadata as stored by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub document_id: String,
    #[serde(default)]
    pub document_name: String,
    #[serde(default = "default_page")]
    pub page_number: u32,
    #[serde(default)]
    pub page_end: Option<u32>,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub has_table: bool,
    #[serde(default)]
    pub section_title: Option<String>,
    #[serde(default)]
    pub extraction_method: ExtractionMethod,
}

fn default_page() -> u32 {
    1
}

impl Default for StoredMetadata {
    fn default() -> Self {
        Self {
            document_id: String::new(),
            document_name: String::new(),
            page_number: default_page(),
            page_end: None,
            chunk_index: 0,
            has_table: false,
            section_title: None,
            extraction_method: ExtractionMethod::Text,
        }
    }
}
