//! Indexed documents and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Indexing status of a document.
///
/// Chunk data is only trusted for `Completed` documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed PDF file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub file_path: String,
    pub page_count: u32,
    pub indexed_at: DateTime<Utc>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
}

impl Document {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>, page_count: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            file_path: file_path.into(),
            page_count: page_count.max(1),
            indexed_at: Utc::now(),
            status: DocumentStatus::Pending,
            error_message: None,
            file_hash: None,
            chunk_count: 0,
        }
    }

    /// Build a pending document for `path`, hashing its contents.
    pub fn from_file(path: &Path, page_count: u32) -> std::io::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut doc = Self::new(name, absolute_path(path), page_count);
        doc.file_hash = Some(compute_file_hash(path)?);
        Ok(doc)
    }

    /// Whether `name` carries a `.pdf` extension, case-insensitively.
    pub fn is_pdf_name(name: &str) -> bool {
        name.to_lowercase().ends_with(".pdf")
    }

    pub fn mark_processing(&mut self) {
        self.status = DocumentStatus::Processing;
        self.error_message = None;
    }

    pub fn mark_completed(&mut self, chunk_count: usize) {
        self.status = DocumentStatus::Completed;
        self.chunk_count = chunk_count;
        self.indexed_at = Utc::now();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = DocumentStatus::Failed;
        self.error_message = Some(message.into());
    }
}

/// Absolute, display-form path used as the document lookup key.
pub fn absolute_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Hex-encoded SHA-256 of a file, streamed in 8 KiB blocks.
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
