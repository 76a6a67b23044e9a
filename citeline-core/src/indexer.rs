//! Document indexing: page extraction, chunking and storage.
//!
//! Each document moves through `pending → processing → completed | failed`.
//! Failures are recorded on the document instead of aborting a folder run;
//! only a broken metadata or vector store stops indexing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CitelineError, ExtractionError, StoreError};
use crate::models::document::{absolute_path, compute_file_hash};
use crate::models::{Document, DocumentStatus, ExtractedPage};
use crate::rag::Chunker;
use crate::store::{MetadataStore, VectorStore};

/// Message stored on documents that produced no chunks.
pub const NO_CONTENT_MESSAGE: &str = "No content could be extracted";

/// Message returned for documents skipped because they are already indexed.
pub const ALREADY_INDEXED_MESSAGE: &str = "Already indexed (use --force to reindex)";

/// Source of per-page text for a document on disk.
pub trait PageSource: Send + Sync {
    fn page_count(&self, path: &Path) -> Result<u32, ExtractionError>;

    /// Pages in order, numbered from 1.
    fn extract_pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, ExtractionError>;
}

/// Reads text pre-extracted next to each PDF as `<file>.pdf.txt`.
///
/// Pages are separated by form feeds, the layout `pdftotext` writes. The
/// PDF itself is only checked for a readable header and encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarTextSource;

impl SidecarTextSource {
    pub fn new() -> Self {
        Self
    }

    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".txt");
        PathBuf::from(name)
    }

    fn check_pdf(path: &Path) -> Result<(), ExtractionError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::Failed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractionError::Corrupted {
                path: path.to_path_buf(),
            });
        }
        if bytes.windows(8).any(|w| w == b"/Encrypt") {
            return Err(ExtractionError::PasswordProtected {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    fn read_pages(path: &Path) -> Result<Vec<String>, ExtractionError> {
        Self::check_pdf(path)?;
        let sidecar = Self::sidecar_path(path);
        let text = std::fs::read_to_string(&sidecar).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::MissingText {
                path: path.to_path_buf(),
            },
            _ => ExtractionError::Failed {
                path: sidecar.clone(),
                message: e.to_string(),
            },
        })?;

        let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
        // pdftotext terminates the last page with a form feed too
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        Ok(pages)
    }
}

impl PageSource for SidecarTextSource {
    fn page_count(&self, path: &Path) -> Result<u32, ExtractionError> {
        Ok(Self::read_pages(path)?.len() as u32)
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, ExtractionError> {
        Ok(Self::read_pages(path)?
            .into_iter()
            .enumerate()
            .map(|(i, text)| ExtractedPage::new(i as u32 + 1, text.trim()))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingOutcome {
    Indexed,
    Skipped,
    Failed,
}

/// Result of indexing a single document.
#[derive(Debug, Clone)]
pub struct IndexingResult {
    pub document: Document,
    pub outcome: IndexingOutcome,
    pub error_message: Option<String>,
    pub chunks_created: usize,
}

impl IndexingResult {
    fn indexed(document: Document, chunks_created: usize) -> Self {
        Self {
            document,
            outcome: IndexingOutcome::Indexed,
            error_message: None,
            chunks_created,
        }
    }

    fn skipped(document: Document) -> Self {
        Self {
            document,
            outcome: IndexingOutcome::Skipped,
            error_message: Some(ALREADY_INDEXED_MESSAGE.to_string()),
            chunks_created: 0,
        }
    }

    fn failed(document: Document, message: impl Into<String>) -> Self {
        Self {
            document,
            outcome: IndexingOutcome::Failed,
            error_message: Some(message.into()),
            chunks_created: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == IndexingOutcome::Indexed
    }
}

/// Summary of a folder run.
#[derive(Debug, Clone, Default)]
pub struct IndexingSummary {
    pub total_documents: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_chunks: usize,
    pub elapsed_seconds: f64,
    pub results: Vec<IndexingResult>,
}

impl IndexingSummary {
    /// Percentage of discovered documents indexed in this run.
    pub fn success_rate(&self) -> f64 {
        if self.total_documents == 0 {
            return 0.0;
        }
        self.indexed as f64 / self.total_documents as f64 * 100.0
    }

    fn record(&mut self, result: IndexingResult) {
        match result.outcome {
            IndexingOutcome::Indexed => {
                self.indexed += 1;
                self.total_chunks += result.chunks_created;
            }
            IndexingOutcome::Skipped => self.skipped += 1,
            IndexingOutcome::Failed => self.failed += 1,
        }
        self.results.push(result);
    }
}

/// Counts and sizes reported by `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStatus {
    pub total_documents: usize,
    pub completed_documents: usize,
    pub failed_documents: usize,
    pub total_chunks: usize,
    pub vector_bytes: u64,
    pub metadata_bytes: u64,
    pub recent: Vec<Document>,
}

impl IndexStatus {
    pub fn collect(
        vector_store: &dyn VectorStore,
        metadata_store: &dyn MetadataStore,
        recent_limit: usize,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            total_documents: metadata_store.count(None)?,
            completed_documents: metadata_store.count(Some(DocumentStatus::Completed))?,
            failed_documents: metadata_store.count(Some(DocumentStatus::Failed))?,
            total_chunks: vector_store.get_count()?,
            vector_bytes: vector_store.storage_size_bytes(),
            metadata_bytes: metadata_store.storage_size_bytes(),
            recent: metadata_store.get_recent(recent_limit)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.total_documents == 0 && self.total_chunks == 0
    }
}

pub struct Indexer {
    page_source: Arc<dyn PageSource>,
    chunker: Chunker,
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
}

impl Indexer {
    pub fn new(
        page_source: Arc<dyn PageSource>,
        chunker: Chunker,
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            page_source,
            chunker,
            vector_store,
            metadata_store,
        }
    }

    /// Index every PDF under `folder`, one document at a time.
    ///
    /// `progress(name, current, total)` runs after each document.
    pub fn index_folder(
        &self,
        folder: &Path,
        recursive: bool,
        force: bool,
        mut progress: impl FnMut(&str, usize, usize),
    ) -> Result<IndexingSummary, CitelineError> {
        let start = Instant::now();
        let files = discover_pdfs(folder, recursive)?;
        info!(folder = %folder.display(), files = files.len(), "Discovered PDF files");

        let mut summary = IndexingSummary {
            total_documents: files.len(),
            ..Default::default()
        };
        for (i, path) in files.iter().enumerate() {
            let result = self.index_document(path, force)?;
            let name = result.document.name.clone();
            summary.record(result);
            progress(&name, i + 1, files.len());
        }
        summary.elapsed_seconds = start.elapsed().as_secs_f64();

        info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            chunks = summary.total_chunks,
            elapsed_secs = summary.elapsed_seconds,
            "Folder indexing finished"
        );
        Ok(summary)
    }

    /// Index one document, recording any failure on its metadata record.
    ///
    /// Errors are returned only when the stores themselves fail.
    pub fn index_document(&self, path: &Path, force: bool) -> Result<IndexingResult, CitelineError> {
        let existing = self.metadata_store.get_by_path(&absolute_path(path))?;
        if let Some(doc) = &existing
            && doc.status == DocumentStatus::Completed
            && !force
        {
            debug!(document = %doc.name, "Skipping already indexed document");
            return Ok(IndexingResult::skipped(doc.clone()));
        }

        let mut current = existing;
        match self.run_indexing(path, &mut current) {
            Ok(result) => Ok(result),
            Err(err) => {
                let message = failure_message(&err);
                warn!(path = %path.display(), error = %message, "Failed to index document");
                let doc = self.record_failure(path, current, &message)?;
                Ok(IndexingResult::failed(doc, message))
            }
        }
    }

    fn run_indexing(
        &self,
        path: &Path,
        current: &mut Option<Document>,
    ) -> Result<IndexingResult, CitelineError> {
        let page_count = self.page_source.page_count(path)?;

        let reindex = current.is_some();
        let doc = match current.take() {
            Some(doc) => doc,
            None => Document::from_file(path, page_count)?,
        };
        let doc = current.insert(doc);
        doc.mark_processing();
        doc.page_count = page_count.max(1);

        if reindex {
            doc.file_hash = Some(compute_file_hash(path)?);
            self.metadata_store.update(doc)?;
            let removed = self.vector_store.delete_by_document_id(&doc.id)?;
            debug!(document = %doc.name, removed, "Removed previous chunks");
        } else {
            self.metadata_store.add(doc)?;
        }

        let pages = self.page_source.extract_pages(path)?;
        let chunks = self.chunker.chunk_pages(&pages, &doc.id, &doc.name)?;
        if chunks.is_empty() {
            doc.mark_failed(NO_CONTENT_MESSAGE);
            self.metadata_store.update(doc)?;
            return Ok(IndexingResult::failed(doc.clone(), NO_CONTENT_MESSAGE));
        }

        self.vector_store.add_chunks(&chunks)?;
        doc.mark_completed(chunks.len());
        self.metadata_store.update(doc)?;

        info!(document = %doc.name, pages = page_count, chunks = chunks.len(), "Indexed document");
        Ok(IndexingResult::indexed(doc.clone(), chunks.len()))
    }

    fn record_failure(
        &self,
        path: &Path,
        current: Option<Document>,
        message: &str,
    ) -> Result<Document, StoreError> {
        match current {
            Some(mut doc) => {
                doc.mark_failed(message);
                self.metadata_store.update(&doc)?;
                Ok(doc)
            }
            None => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let mut doc = Document::new(name, absolute_path(path), 1);
                doc.mark_failed(message);
                self.metadata_store.add(&doc)?;
                Ok(doc)
            }
        }
    }

    /// Delete every chunk and document record.
    ///
    /// Returns `(documents_deleted, chunks_deleted)`.
    pub fn clear_all(&self) -> Result<(usize, usize), StoreError> {
        clear_index(self.vector_store.as_ref(), self.metadata_store.as_ref())
    }

    pub fn status(&self, recent_limit: usize) -> Result<IndexStatus, StoreError> {
        IndexStatus::collect(
            self.vector_store.as_ref(),
            self.metadata_store.as_ref(),
            recent_limit,
        )
    }
}

/// Delete every chunk and document record from a pair of stores.
pub fn clear_index(
    vector_store: &dyn VectorStore,
    metadata_store: &dyn MetadataStore,
) -> Result<(usize, usize), StoreError> {
    let chunks = vector_store.delete_all()?;
    let documents = metadata_store.delete_all()?;
    info!(documents, chunks, "Cleared index");
    Ok((documents, chunks))
}

fn failure_message(err: &CitelineError) -> String {
    match err {
        CitelineError::Extraction(ExtractionError::PasswordProtected { .. }) => {
            "Password protected".to_string()
        }
        CitelineError::Extraction(ExtractionError::Corrupted { .. }) => {
            "Unable to read PDF (corrupted)".to_string()
        }
        other => other.to_string(),
    }
}

/// PDF files in `folder`, sorted by lower-cased file name.
pub fn discover_pdfs(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>, CitelineError> {
    if !folder.is_dir() {
        return Err(CitelineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", folder.display()),
        )));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| Document::is_pdf_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort_by_cached_key(|p| {
        (
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            p.clone(),
        )
    });
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::error::ProviderError;
    use crate::providers::{ChatProvider, HashingEmbedder};
    use crate::store::{InMemoryMetadataStore, InMemoryVectorStore};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PAGE: &str = "The quarterly report lists the regional managers and their budgets for the year.";

    /// Chat that always fails, so chunking takes the paragraph fallback.
    struct OfflineChat;

    impl ChatProvider for OfflineChat {
        fn chat(&self, _: &str, _: &str, _: f32, _: usize) -> Result<String, ProviderError> {
            Err(ProviderError::network("offline"))
        }

        fn model_name(&self) -> &str {
            "offline"
        }
    }

    /// Page source keyed by file name.
    #[derive(Default)]
    struct MapSource {
        pages: Mutex<HashMap<String, Result<Vec<String>, String>>>,
    }

    impl MapSource {
        fn set(&self, name: &str, pages: Result<Vec<&str>, &str>) {
            let value = pages
                .map(|p| p.into_iter().map(String::from).collect())
                .map_err(String::from);
            self.pages.lock().unwrap().insert(name.to_string(), value);
        }

        fn lookup(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            match self.pages.lock().unwrap().get(&name) {
                Some(Ok(pages)) => Ok(pages.clone()),
                Some(Err(kind)) if kind == "password" => Err(ExtractionError::PasswordProtected {
                    path: path.to_path_buf(),
                }),
                _ => Err(ExtractionError::Corrupted {
                    path: path.to_path_buf(),
                }),
            }
        }
    }

    impl PageSource for MapSource {
        fn page_count(&self, path: &Path) -> Result<u32, ExtractionError> {
            Ok(self.lookup(path)?.len() as u32)
        }

        fn extract_pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, ExtractionError> {
            Ok(self
                .lookup(path)?
                .into_iter()
                .enumerate()
                .map(|(i, t)| ExtractedPage::new(i as u32 + 1, t))
                .collect())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        source: Arc<MapSource>,
        vectors: Arc<InMemoryVectorStore>,
        metadata: Arc<InMemoryMetadataStore>,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MapSource::default());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let chunker = Chunker::new(
            Arc::new(OfflineChat),
            Arc::new(HashingEmbedder::new(32)),
            ChunkingConfig::default(),
        );
        let indexer = Indexer::new(source.clone(), chunker, vectors.clone(), metadata.clone());
        Fixture {
            dir: tempfile::tempdir().unwrap(),
            source,
            vectors,
            metadata,
            indexer,
        }
    }

    impl Fixture {
        fn pdf(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, format!("%PDF-1.4 {name}")).unwrap();
            path
        }
    }

    #[test]
    fn test_index_document_completes() {
        let fx = fixture();
        let path = fx.pdf("report.pdf");
        fx.source.set("report.pdf", Ok(vec![PAGE, PAGE]));

        let result = fx.indexer.index_document(&path, false).unwrap();
        assert!(result.is_success());
        assert_eq!(result.chunks_created, 2);
        assert_eq!(result.document.status, DocumentStatus::Completed);
        assert_eq!(result.document.page_count, 2);
        assert!(result.document.file_hash.is_some());
        assert_eq!(fx.vectors.get_count().unwrap(), 2);
        assert_eq!(fx.metadata.count(Some(DocumentStatus::Completed)).unwrap(), 1);
    }

    #[test]
    fn test_completed_document_is_skipped() {
        let fx = fixture();
        let path = fx.pdf("report.pdf");
        fx.source.set("report.pdf", Ok(vec![PAGE]));
        fx.indexer.index_document(&path, false).unwrap();

        let again = fx.indexer.index_document(&path, false).unwrap();
        assert_eq!(again.outcome, IndexingOutcome::Skipped);
        assert_eq!(again.error_message.as_deref(), Some(ALREADY_INDEXED_MESSAGE));
        assert_eq!(fx.vectors.get_count().unwrap(), 1);
    }

    #[test]
    fn test_force_reindex_replaces_chunks() {
        let fx = fixture();
        let path = fx.pdf("report.pdf");
        fx.source.set("report.pdf", Ok(vec![PAGE, PAGE, PAGE]));
        let first = fx.indexer.index_document(&path, false).unwrap();
        assert_eq!(fx.vectors.get_count().unwrap(), 3);

        fx.source.set("report.pdf", Ok(vec![PAGE]));
        let second = fx.indexer.index_document(&path, true).unwrap();
        assert!(second.is_success());
        assert_eq!(second.document.id, first.document.id);
        assert_eq!(fx.vectors.get_count().unwrap(), 1);
        assert_eq!(fx.metadata.count(None).unwrap(), 1);
    }

    #[test]
    fn test_empty_document_fails() {
        let fx = fixture();
        let path = fx.pdf("blank.pdf");
        fx.source.set("blank.pdf", Ok(vec!["too short", ""]));

        let result = fx.indexer.index_document(&path, false).unwrap();
        assert_eq!(result.outcome, IndexingOutcome::Failed);
        assert_eq!(result.document.status, DocumentStatus::Failed);
        assert_eq!(result.document.error_message.as_deref(), Some(NO_CONTENT_MESSAGE));
        assert_eq!(fx.vectors.get_count().unwrap(), 0);
    }

    #[test]
    fn test_extraction_error_recorded() {
        let fx = fixture();
        let path = fx.pdf("locked.pdf");
        fx.source.set("locked.pdf", Err("password"));

        let result = fx.indexer.index_document(&path, false).unwrap();
        assert_eq!(result.outcome, IndexingOutcome::Failed);
        assert_eq!(result.error_message.as_deref(), Some("Password protected"));
        let stored = fx
            .metadata
            .get_by_path(&absolute_path(&path))
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
    }

    #[test]
    fn test_failed_document_is_retried_without_force() {
        let fx = fixture();
        let path = fx.pdf("report.pdf");
        fx.source.set("report.pdf", Err("corrupt"));
        let failed = fx.indexer.index_document(&path, false).unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("Unable to read PDF (corrupted)"));

        fx.source.set("report.pdf", Ok(vec![PAGE]));
        let retried = fx.indexer.index_document(&path, false).unwrap();
        assert!(retried.is_success());
        assert_eq!(retried.document.id, failed.document.id);
    }

    #[test]
    fn test_index_folder_continues_after_failure() {
        let fx = fixture();
        for name in ["b.pdf", "A.PDF", "c.pdf"] {
            fx.pdf(name);
        }
        std::fs::write(fx.dir.path().join("notes.txt"), PAGE).unwrap();
        fx.source.set("A.PDF", Ok(vec![PAGE]));
        fx.source.set("b.pdf", Err("corrupt"));
        fx.source.set("c.pdf", Ok(vec![PAGE, PAGE]));

        let mut seen = Vec::new();
        let summary = fx
            .indexer
            .index_folder(fx.dir.path(), false, false, |name, current, total| {
                seen.push((name.to_string(), current, total));
            })
            .unwrap();

        assert_eq!(summary.total_documents, 3);
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(
            seen,
            vec![
                ("A.PDF".to_string(), 1, 3),
                ("b.pdf".to_string(), 2, 3),
                ("c.pdf".to_string(), 3, 3),
            ]
        );
    }

    #[test]
    fn test_discover_respects_recursion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("top.pdf"), "%PDF").unwrap();
        std::fs::write(dir.path().join("nested").join("deep.pdf"), "%PDF").unwrap();

        assert_eq!(discover_pdfs(dir.path(), false).unwrap().len(), 1);
        let all = discover_pdfs(dir.path(), true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].ends_with("nested/deep.pdf"));
    }

    #[test]
    fn test_discover_missing_folder() {
        assert!(discover_pdfs(Path::new("/nonexistent/citeline"), false).is_err());
    }

    #[test]
    fn test_clear_all_and_status() {
        let fx = fixture();
        let path = fx.pdf("report.pdf");
        fx.source.set("report.pdf", Ok(vec![PAGE, PAGE]));
        fx.indexer.index_document(&path, false).unwrap();

        let status = fx.indexer.status(5).unwrap();
        assert_eq!(status.completed_documents, 1);
        assert_eq!(status.total_chunks, 2);
        assert_eq!(status.recent.len(), 1);

        assert_eq!(fx.indexer.clear_all().unwrap(), (1, 2));
        assert_eq!(fx.indexer.status(5).unwrap().total_documents, 0);
    }

    #[test]
    fn test_sidecar_source_splits_pages() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, "%PDF-1.7").unwrap();
        std::fs::write(SidecarTextSource::sidecar_path(&pdf), "first page\x0c second page \x0c").unwrap();

        let source = SidecarTextSource::new();
        assert_eq!(source.page_count(&pdf).unwrap(), 2);
        let pages = source.extract_pages(&pdf).unwrap();
        assert_eq!(pages[0], ExtractedPage::new(1, "first page"));
        assert_eq!(pages[1], ExtractedPage::new(2, "second page"));
    }

    #[test]
    fn test_sidecar_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let source = SidecarTextSource::new();

        let missing = dir.path().join("missing.pdf");
        std::fs::write(&missing, "%PDF-1.7").unwrap();
        assert!(matches!(
            source.extract_pages(&missing),
            Err(ExtractionError::MissingText { .. })
        ));

        let garbage = dir.path().join("garbage.pdf");
        std::fs::write(&garbage, "not a pdf").unwrap();
        assert!(matches!(
            source.page_count(&garbage),
            Err(ExtractionError::Corrupted { .. })
        ));

        let locked = dir.path().join("locked.pdf");
        std::fs::write(&locked, "%PDF-1.7 trailer << /Encrypt 5 0 R >>").unwrap();
        assert!(matches!(
            source.page_count(&locked),
            Err(ExtractionError::PasswordProtected { .. })
        ));
    }
}
