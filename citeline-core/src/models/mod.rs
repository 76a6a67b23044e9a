//! Data model shared by the pipeline stages.

pub mod chunk;
pub mod document;
pub mod page;
pub mod response;

pub use chunk::{Chunk, ChunkMetadata, ExtractionMethod, StoredMetadata};
pub use document::{Document, DocumentStatus};
pub use page::ExtractedPage;
pub use response::{Citation, Response, ResponseMetadata};
