//! Model-assisted semantic chunking with a deterministic fallback.
//!
//! Each page is offered to the chat model for natural-boundary segmentation.
//! Pages that are too large, or that the model fails on, are split on blank
//! lines instead. Chunks larger than the embedding input limit are re-split
//! before every chunk is embedded in fixed-size batches.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ChunkingConfig;
use crate::error::ProviderError;
use crate::models::chunk::TABLE_MARKER;
use crate::models::{Chunk, ChunkMetadata, ExtractedPage, ExtractionMethod};
use crate::providers::{ChatProvider, Embedder};

/// Sentence terminators tried when no paragraph break is usable.
const SENTENCE_SEPARATORS: [&str; 4] = [". ", ".\n", "? ", "!\n"];

pub struct Chunker {
    chat: Arc<dyn ChatProvider>,
    embedder: Arc<dyn Embedder>,
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        embedder: Arc<dyn Embedder>,
        config: ChunkingConfig,
    ) -> Self {
        Self {
            chat,
            embedder,
            config,
        }
    }

    /// Chunk and embed every page of a document.
    ///
    /// Returns an empty list when no page holds enough text. Any embedding
    /// failure aborts the whole document.
    pub fn chunk_pages(
        &self,
        pages: &[ExtractedPage],
        document_id: &str,
        document_name: &str,
    ) -> Result<Vec<Chunk>, ProviderError> {
        let mut chunks = Vec::new();
        for page in pages {
            let content = page.combined_content();
            if !Chunk::is_substantial(&content, self.config.min_chunk_chars) {
                continue;
            }
            chunks.extend(self.chunk_text(&content, page.page_number, document_id, document_name));
        }

        if chunks.is_empty() {
            warn!(document = document_name, "No chunks created for document");
            return Ok(chunks);
        }

        let chunks = self.embed_chunks(chunks)?;
        info!(
            document = document_name,
            chunks = chunks.len(),
            pages = pages.len(),
            "Chunked document"
        );
        Ok(chunks)
    }

    /// Chunk and embed arbitrary text as if it were a single page.
    pub fn chunk_single_text(
        &self,
        text: &str,
        document_id: &str,
        document_name: &str,
        page_number: u32,
    ) -> Result<Vec<Chunk>, ProviderError> {
        let chunks = self.chunk_text(text, page_number, document_id, document_name);
        if chunks.is_empty() {
            return Ok(chunks);
        }
        self.embed_chunks(chunks)
    }

    /// Page text to unembedded chunks; indices are assigned later.
    fn chunk_text(
        &self,
        text: &str,
        page_number: u32,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Chunk> {
        if text.chars().count() <= self.config.max_semantic_input_chars {
            match self.chat.chunk_text(text, &format!("Page {page_number}")) {
                Ok(segments) => {
                    let chunks: Vec<Chunk> = segments
                        .into_iter()
                        .filter_map(|segment| {
                            let content = segment.content.trim();
                            Chunk::is_substantial(content, self.config.min_chunk_chars).then(|| {
                                Chunk::new(
                                    document_id,
                                    document_name,
                                    content,
                                    page_number,
                                    0,
                                    ChunkMetadata {
                                        has_table: segment.has_table,
                                        section_title: segment.section_title,
                                        extraction_method: ExtractionMethod::Text,
                                    },
                                )
                            })
                        })
                        .collect();
                    if !chunks.is_empty() {
                        return chunks;
                    }
                    debug!(page = page_number, "Semantic chunking returned no usable segments");
                }
                Err(e) => {
                    warn!(page = page_number, error = %e, "Semantic chunking failed, using fallback");
                }
            }
        }

        fallback_split(
            text,
            self.config.fallback_chunk_chars,
            self.config.min_chunk_chars,
        )
        .into_iter()
        .map(|content| {
            let has_table = content.contains(TABLE_MARKER);
            Chunk::new(
                document_id,
                document_name,
                content,
                page_number,
                0,
                ChunkMetadata {
                    has_table,
                    section_title: None,
                    extraction_method: ExtractionMethod::Text,
                },
            )
        })
        .collect()
    }

    /// Re-split oversized chunks, renumber, then embed in batches.
    fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, ProviderError> {
        let mut processed: Vec<Chunk> = chunks
            .into_iter()
            .flat_map(|chunk| self.split_oversized_chunk(chunk))
            .collect();
        for (index, chunk) in processed.iter_mut().enumerate() {
            chunk.chunk_index = index;
        }

        let batch_size = self.config.embedding_batch_size.max(1);
        let total_batches = processed.len().div_ceil(batch_size);
        for (batch_no, batch) in processed.chunks_mut(batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts)?;
            if embeddings.len() != batch.len() {
                return Err(ProviderError::invalid_response(format!(
                    "requested {} embeddings, received {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            for (chunk, embedding) in batch.iter_mut().zip(embeddings) {
                chunk.embedding = embedding;
                chunk.estimate_tokens();
            }
            if total_batches > 1 {
                debug!(batch = batch_no + 1, total = total_batches, "Embedded batch");
            }
        }
        Ok(processed)
    }

    fn split_oversized_chunk(&self, chunk: Chunk) -> Vec<Chunk> {
        if chunk.content.chars().count() <= self.config.max_embedding_chars {
            return vec![chunk];
        }

        let pieces = split_oversized(
            &chunk.content,
            self.config.max_embedding_chars,
            self.config.min_chunk_chars,
        );
        if pieces.is_empty() {
            return vec![chunk];
        }
        info!(pieces = pieces.len(), "Split oversized chunk");
        pieces
            .into_iter()
            .map(|piece| {
                let mut sub = Chunk::new(
                    &chunk.document_id,
                    &chunk.document_name,
                    piece,
                    chunk.page_number,
                    chunk.chunk_index,
                    chunk.metadata.clone(),
                );
                sub.page_end = chunk.page_end;
                sub
            })
            .collect()
    }
}

/// Accumulate blank-line separated paragraphs into chunks of at most
/// `max_chars` (a single paragraph may exceed it). Chunks shorter than
/// `min_chars` are discarded.
pub fn fallback_split(text: &str, max_chars: usize, min_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = para.chars().count();
        if !current.is_empty() && current_len + para_len > max_chars {
            if Chunk::is_substantial(&current, min_chars) {
                chunks.push(std::mem::take(&mut current));
            }
            current = para.to_string();
            current_len = para_len;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(para);
            current_len += para_len;
        }
    }

    if Chunk::is_substantial(&current, min_chars) {
        chunks.push(current);
    }
    chunks
}

/// Greedily cut `content` into trimmed pieces of at most `limit` chars,
/// preferring paragraph breaks, then sentence ends, past the half-way
/// point. Pieces shorter than `min_chars` are dropped.
pub fn split_oversized(content: &str, limit: usize, min_chars: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut rest = content;

    while !rest.is_empty() {
        let piece;
        match rest.char_indices().nth(limit) {
            None => {
                piece = rest;
                rest = "";
            }
            Some((limit_byte, _)) => {
                let split = split_point(rest, limit_byte, limit);
                piece = rest[..split].trim();
                rest = rest[split..].trim();
            }
        }
        if Chunk::is_substantial(piece, min_chars) {
            pieces.push(piece.to_string());
        }
    }
    pieces
}

/// Byte offset at which to cut `text`, given the byte offset of the
/// `limit`-th char.
fn split_point(text: &str, limit_byte: usize, limit: usize) -> usize {
    let window = &text[..limit_byte];
    let half = limit / 2;
    let past_half = |byte: usize| window[..byte].chars().count() > half;

    if let Some(pos) = window.rfind("\n\n")
        && past_half(pos)
    {
        return pos;
    }
    for sep in SENTENCE_SEPARATORS {
        if let Some(pos) = window.rfind(sep)
            && past_half(pos)
        {
            return pos + sep.len();
        }
    }
    limit_byte
}
