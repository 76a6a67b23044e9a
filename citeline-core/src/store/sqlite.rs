//! SQLite-backed stores.
//!
//! Embeddings are stored as little-endian `f32` blobs and scanned in full on
//! every query; chunk metadata is stored as JSON. A `Mutex` serializes access
//! to the connection.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::{MetadataStore, VectorHit, VectorStore, check_dimensions, l2_distance, nearest};
use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentStatus, StoredMetadata};

const VECTOR_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    content     TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    dimensions  INTEGER NOT NULL,
    metadata    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
";

const METADATA_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    file_path     TEXT NOT NULL UNIQUE,
    page_count    INTEGER NOT NULL,
    indexed_at    TEXT NOT NULL,
    status        TEXT NOT NULL,
    error_message TEXT,
    file_hash     TEXT,
    chunk_count   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
";

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            message: format!("embedding blob of {} bytes", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Size of a database file plus its write-ahead log, if any.
fn file_size(path: Option<&Path>) -> u64 {
    let Some(path) = path else {
        return 0;
    };
    let main = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    main + std::fs::metadata(PathBuf::from(wal))
        .map(|m| m.len())
        .unwrap_or(0)
}

fn open(path: &Path, schema: &str) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(schema)?;
    debug!(path = %path.display(), "Opened SQLite store");
    Ok(conn)
}

fn open_in_memory(schema: &str) -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(schema)?;
    Ok(conn)
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteVectorStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open(path, VECTOR_SCHEMA)?),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_in_memory(VECTOR_SCHEMA)?),
            path: None,
        })
    }
}

impl VectorStore for SqliteVectorStore {
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let existing: Option<usize> = conn
            .query_row("SELECT dimensions FROM chunks LIMIT 1", [], |row| row.get(0))
            .optional()?;
        let mut dims = existing;
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

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks (id, document_id, content, embedding, dimensions, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                let metadata = serde_json::to_string(&chunk.stored_metadata()).map_err(|e| {
                    StoreError::Corrupt {
                        message: e.to_string(),
                    }
                })?;
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.content,
                    encode_embedding(&chunk.embedding),
                    chunk.embedding.len(),
                    metadata,
                ])?;
            }
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<VectorHit>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT id, content, embedding, metadata FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, content, blob, metadata) = row?;
            let stored = decode_embedding(&blob)?;
            check_dimensions(stored.len(), embedding.len())?;
            let metadata: StoredMetadata =
                serde_json::from_str(&metadata).map_err(|e| StoreError::Corrupt {
                    message: format!("chunk {id} metadata: {e}"),
                })?;
            hits.push(VectorHit {
                distance: l2_distance(&stored, embedding),
                id,
                content,
                metadata,
            });
        }
        Ok(nearest(hits, n_results))
    }

    fn delete_by_document_id(&self, document_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.execute("DELETE FROM chunks", [])?)
    }

    fn get_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?)
    }

    fn storage_size_bytes(&self) -> u64 {
        file_size(self.path.as_deref())
    }
}

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open(path, METADATA_SCHEMA)?),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_in_memory(METADATA_SCHEMA)?),
            path: None,
        })
    }
}

const DOCUMENT_COLUMNS: &str =
    "id, name, file_path, page_count, indexed_at, status, error_message, file_hash, chunk_count";

struct DocumentRow {
    id: String,
    name: String,
    file_path: String,
    page_count: u32,
    indexed_at: String,
    status: String,
    error_message: Option<String>,
    file_hash: Option<String>,
    chunk_count: usize,
}

impl DocumentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            file_path: row.get(2)?,
            page_count: row.get(3)?,
            indexed_at: row.get(4)?,
            status: row.get(5)?,
            error_message: row.get(6)?,
            file_hash: row.get(7)?,
            chunk_count: row.get(8)?,
        })
    }

    fn into_document(self) -> Result<Document, StoreError> {
        let status = DocumentStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            message: format!("document {} has status '{}'", self.id, self.status),
        })?;
        let indexed_at = DateTime::parse_from_rfc3339(&self.indexed_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                message: format!("document {} indexed_at: {e}", self.id),
            })?;
        Ok(Document {
            id: self.id,
            name: self.name,
            file_path: self.file_path,
            page_count: self.page_count,
            indexed_at,
            status,
            error_message: self.error_message,
            file_hash: self.file_hash,
            chunk_count: self.chunk_count,
        })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn add(&self, document: &Document) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO documents ({DOCUMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                document.id,
                document.name,
                document.file_path,
                document.page_count,
                document.indexed_at.to_rfc3339(),
                document.status.as_str(),
                document.error_message,
                document.file_hash,
                document.chunk_count,
            ],
        )?;
        Ok(())
    }

    fn update(&self, document: &Document) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let changed = conn.execute(
            "UPDATE documents SET name = ?2, file_path = ?3, page_count = ?4, indexed_at = ?5,
                 status = ?6, error_message = ?7, file_hash = ?8, chunk_count = ?9
             WHERE id = ?1",
            params![
                document.id,
                document.name,
                document.file_path,
                document.page_count,
                document.indexed_at.to_rfc3339(),
                document.status.as_str(),
                document.error_message,
                document.file_hash,
                document.chunk_count,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::DocumentNotFound {
                id: document.id.clone(),
            });
        }
        Ok(())
    }

    fn get_by_path(&self, file_path: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE file_path = ?1"),
                params![file_path],
                DocumentRow::from_row,
            )
            .optional()?;
        row.map(DocumentRow::into_document).transpose()
    }

    fn count(&self, status: Option<DocumentStatus>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY indexed_at DESC, name ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], DocumentRow::from_row)?;
        rows.map(|row| row?.into_document()).collect()
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.execute("DELETE FROM documents", [])?)
    }

    fn storage_size_bytes(&self) -> u64 {
        file_size(self.path.as_deref())
    }
}
