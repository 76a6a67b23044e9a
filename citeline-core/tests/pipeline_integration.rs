//! Integration tests for the indexing and question-answering pipeline.
//!
//! These tests run indexing and `RagPipeline::ask` end-to-end with a
//! scripted chat model, a keyword-counting cross-encoder and the hashing
//! embedder, over both in-memory and SQLite stores.

use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use citeline_core::config::{ChunkingConfig, GenerationConfig, RetrievalConfig};
use citeline_core::models::response::NOT_FOUND_ANSWER;
use citeline_core::providers::{CrossEncoder, HashingEmbedder};
use citeline_core::rag::prompts;
use citeline_core::store::{
    InMemoryMetadataStore, InMemoryVectorStore, SqliteMetadataStore, SqliteVectorStore,
};
use citeline_core::{
    ChatProvider, Chunker, CitelineError, DocumentStatus, ExtractedPage, ExtractionError,
    Generator, Indexer, MetadataStore, PageSource, ProviderError, QueryStrategy, RagPipeline,
    RerankerHandle, Retriever, VectorStore,
};

const NORTH: &str = "The Northern office is managed by Alice Smith. The Northern office budget for the year is 4.2 million dollars, approved in March.";
const SOUTH: &str = "The Southern office is managed by Bob Jones. The Southern office budget is 3.1 million dollars for operations and hiring.";
const WEST: &str = "The Western office is managed by Carol White, who joined the company in 2019 as regional manager.";

/// Chat model that refuses chunking requests and replays one answer.
struct ScriptedChat {
    reply: String,
    systems: Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            systems: Mutex::new(Vec::new()),
        })
    }

    fn answer_calls(&self) -> Vec<String> {
        self.systems.lock().unwrap().clone()
    }
}

impl ChatProvider for ScriptedChat {
    fn chat(&self, system: &str, _: &str, _: f32, _: usize) -> Result<String, ProviderError> {
        if system == prompts::CHUNKING_SYSTEM_PROMPT {
            return Err(ProviderError::network("chunking disabled in tests"));
        }
        self.systems.lock().unwrap().push(system.to_string());
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Logit = number of query words (longer than three letters) in the passage, minus one.
struct KeywordCrossEncoder;

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(str::to_string)
        .collect()
}

impl CrossEncoder for KeywordCrossEncoder {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, ProviderError> {
        Ok(pairs
            .iter()
            .map(|(query, passage)| {
                let passage = words(passage);
                let hits = words(query).iter().filter(|w| passage.contains(w)).count();
                hits as f32 - 1.0
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

/// Page source serving fixed text by file name.
struct FixedPages(HashMap<String, Vec<String>>);

impl FixedPages {
    fn lookup(&self, path: &Path) -> Result<&Vec<String>, ExtractionError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.0.get(&name).ok_or(ExtractionError::MissingText {
            path: path.to_path_buf(),
        })
    }
}

impl PageSource for FixedPages {
    fn page_count(&self, path: &Path) -> Result<u32, ExtractionError> {
        Ok(self.lookup(path)?.len() as u32)
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, ExtractionError> {
        Ok(self
            .lookup(path)?
            .iter()
            .enumerate()
            .map(|(i, t)| ExtractedPage::new(i as u32 + 1, t.as_str()))
            .collect())
    }
}

fn write_corpus(dir: &Path) -> FixedPages {
    let mut pages = HashMap::new();
    for (name, text) in [("north.pdf", NORTH), ("south.pdf", SOUTH), ("west.pdf", WEST)] {
        std::fs::write(dir.join(name), format!("%PDF-1.4 {name}")).unwrap();
        pages.insert(name.to_string(), vec![text.to_string()]);
    }
    FixedPages(pages)
}

fn index_corpus(
    dir: &Path,
    chat: Arc<ScriptedChat>,
    embedder: Arc<HashingEmbedder>,
    vectors: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
) -> usize {
    let source = Arc::new(write_corpus(dir));
    let chunker = Chunker::new(chat, embedder, ChunkingConfig::default());
    let indexer = Indexer::new(source, chunker, vectors, metadata);
    let summary = indexer.index_folder(dir, false, false, |_, _, _| {}).unwrap();
    assert_eq!(summary.failed, 0);
    summary.total_chunks
}

fn pipeline(
    chat: Arc<ScriptedChat>,
    embedder: Arc<HashingEmbedder>,
    vectors: Arc<dyn VectorStore>,
    reranker: RerankerHandle,
) -> RagPipeline {
    let retriever = Retriever::new(
        embedder,
        vectors,
        Arc::new(reranker),
        RetrievalConfig::default(),
    );
    let generator = Generator::new(chat, GenerationConfig::default());
    RagPipeline::new(retriever, generator)
}

struct Harness {
    _dir: tempfile::TempDir,
    chat: Arc<ScriptedChat>,
    embedder: Arc<HashingEmbedder>,
    vectors: Arc<InMemoryVectorStore>,
}

fn indexed_harness(reply: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChat::new(reply);
    let embedder = Arc::new(HashingEmbedder::new(64));
    let vectors = Arc::new(InMemoryVectorStore::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let chunks = index_corpus(
        dir.path(),
        chat.clone(),
        embedder.clone(),
        vectors.clone(),
        metadata,
    );
    assert_eq!(chunks, 3);
    Harness {
        _dir: dir,
        chat,
        embedder,
        vectors,
    }
}

#[test]
fn test_empty_index_answers_not_found() {
    let chat = ScriptedChat::new("{}");
    let pipeline = pipeline(
        chat.clone(),
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(InMemoryVectorStore::new()),
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );

    let answer = pipeline.ask("What is the Northern office budget?", None).unwrap();
    assert!(answer.response.not_found);
    assert_eq!(answer.response.answer, NOT_FOUND_ANSWER);
    assert_eq!(answer.response.metadata.chunks_used, 0);
    assert_eq!(answer.response.metadata.confidence_score, 0.0);
    assert!(chat.answer_calls().is_empty());
}

#[test]
fn test_standard_question_cites_best_source() {
    let h = indexed_harness(
        r#"{"answer":"The Northern office budget is 4.2 million dollars [Source 1].","citations":[{"source_index":1,"verbatim_quote":"The Northern office budget for the year is 4.2 million dollars"}],"not_found":false}"#,
    );
    let pipeline = pipeline(
        h.chat.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );

    let answer = pipeline.ask("What is the Northern office budget?", None).unwrap();
    assert_eq!(answer.strategy, QueryStrategy::Standard);
    assert_eq!(answer.retrieval.chunks[0].document_name, "north.pdf");
    assert_eq!(answer.retrieval.total_retrieved, 3);

    let response = &answer.response;
    assert!(!response.not_found);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].document_name, "north.pdf");
    assert_eq!(response.citations[0].page_number, 1);
    assert_eq!(response.metadata.quotes_verified, 1);
    assert!(response.metadata.confidence_score > 0.0);
    assert_eq!(h.chat.answer_calls(), vec![prompts::GROUNDED_SYSTEM_PROMPT.to_string()]);

    let json = response.to_json_dict();
    assert_eq!(json["citations"][0]["document_name"], "north.pdf");
    assert_eq!(json["metadata"]["chunks_used"], 1);
}

#[test]
fn test_aggregate_question_spans_documents() {
    let h = indexed_harness(
        r#"{"answer":"Alice Smith, Bob Jones and Carol White.","citations":[],"not_found":false}"#,
    );
    let pipeline = pipeline(
        h.chat.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );

    let answer = pipeline.ask("Who are the managers?", None).unwrap();
    assert_eq!(answer.strategy, QueryStrategy::Aggregated);
    assert!(answer.retrieval.document_count() >= 2);
    assert_eq!(
        h.chat.answer_calls(),
        vec![prompts::AGGREGATED_SYSTEM_PROMPT.to_string()]
    );
    // no model citations: one per top chunk, up to three
    assert_eq!(answer.response.citations.len(), 3);
}

#[test]
fn test_max_sources_limits_citations() {
    let h = indexed_harness(r#"{"answer":"Budgets differ.","citations":[],"not_found":false}"#);
    let pipeline = pipeline(
        h.chat.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );

    let answer = pipeline.ask("Compare the office budgets", Some(1)).unwrap();
    assert_eq!(answer.response.citations.len(), 1);
}

#[test]
fn test_model_not_found_flag() {
    let h = indexed_harness(r#"{"answer":"","citations":[],"not_found":true}"#);
    let pipeline = pipeline(
        h.chat.clone(),
        h.embedder.clone(),
        h.vectors.clone(),
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );

    let answer = pipeline.ask("What is the capital of France?", None).unwrap();
    assert!(answer.response.not_found);
    assert_eq!(answer.response.metadata.chunks_retrieved, 3);
}

#[test]
fn test_reranker_failure_propagates() {
    let h = indexed_harness("{}");
    let failing = RerankerHandle::new(Box::new(|| {
        Err(ProviderError::ModelUnavailable {
            message: "weights missing".to_string(),
        })
    }));
    let pipeline = pipeline(h.chat.clone(), h.embedder.clone(), h.vectors.clone(), failing);

    let err = pipeline.ask("What is the Northern office budget?", None).unwrap_err();
    assert!(matches!(
        err,
        CitelineError::Provider(ProviderError::ModelUnavailable { .. })
    ));
    assert!(h.chat.answer_calls().is_empty());
}

#[test]
fn test_sqlite_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    let vector_path: PathBuf = dir.path().join("vectors.db");
    let metadata_path: PathBuf = dir.path().join("metadata.db");

    let chat = ScriptedChat::new(r#"{"answer":"4.2 million dollars.","citations":[{"source_index":1,"verbatim_quote":"4.2 million dollars"}],"not_found":false}"#);
    let embedder = Arc::new(HashingEmbedder::new(64));
    {
        let vectors = Arc::new(SqliteVectorStore::open(&vector_path).unwrap());
        let metadata = Arc::new(SqliteMetadataStore::open(&metadata_path).unwrap());
        index_corpus(&docs, chat.clone(), embedder.clone(), vectors, metadata);
    }

    let vectors = Arc::new(SqliteVectorStore::open(&vector_path).unwrap());
    let metadata = SqliteMetadataStore::open(&metadata_path).unwrap();
    assert_eq!(vectors.get_count().unwrap(), 3);
    assert_eq!(metadata.count(Some(DocumentStatus::Completed)).unwrap(), 3);

    let pipeline = pipeline(
        chat,
        embedder,
        vectors,
        RerankerHandle::from_encoder(Box::new(KeywordCrossEncoder)),
    );
    let answer = pipeline.ask("What is the Northern office budget?", None).unwrap();
    assert_eq!(answer.response.citations[0].document_name, "north.pdf");
    assert_eq!(answer.response.metadata.quotes_verified, 1);
}
