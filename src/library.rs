//! The document record store, as seen by the retrieval core.
//!
//! The core only reads from it: [`Library::get_document`] and
//! [`Library::list_documents`]. [`SqliteLibrary`] is the store bundled with
//! the `shelf` binary and also has the write operations the CLI needs;
//! [`MemoryLibrary`] backs tests and embedders that already hold their
//! documents in memory.
//!
//! A document added with a session id belongs to that session's library
//! only; documents without one are on the owner's bookshelf.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{Document, FileType};

/// Which of an owner's collections to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryScope {
    /// Documents not attached to any session.
    Bookshelf,
    /// Documents uploaded within one chat session.
    Session(String),
}

impl LibraryScope {
    pub fn from_session(session_id: Option<String>) -> Self {
        match session_id {
            Some(id) => LibraryScope::Session(id),
            None => LibraryScope::Bookshelf,
        }
    }

    fn includes(&self, doc: &Document) -> bool {
        match self {
            LibraryScope::Bookshelf => doc.session_id.is_none(),
            LibraryScope::Session(id) => doc.session_id.as_deref() == Some(id.as_str()),
        }
    }
}

#[async_trait]
pub trait Library: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents owned by `owner_user_id` in `scope`, ordered by id.
    async fn list_documents(&self, owner_user_id: &str, scope: &LibraryScope) -> Result<Vec<Document>>;
}

// ============ SQLite ============

pub struct SqliteLibrary {
    pool: SqlitePool,
}

const DOCUMENT_COLUMNS: &str =
    "id, owner_user_id, session_id, title, file_type, storage_url, embedded_content, timestamp";

impl SqliteLibrary {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a document record.
    pub async fn add_document(&self, doc: &Document) -> Result<()> {
        let timestamp = doc
            .timestamp
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_user_id, session_id, title, file_type, storage_url, embedded_content, timestamp, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_user_id = excluded.owner_user_id,
                session_id = excluded.session_id,
                title = excluded.title,
                file_type = excluded.file_type,
                storage_url = excluded.storage_url,
                embedded_content = excluded.embedded_content,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_user_id)
        .bind(&doc.session_id)
        .bind(&doc.title)
        .bind(doc.file_type.as_str())
        .bind(&doc.storage_url)
        .bind(&doc.embedded_content)
        .bind(timestamp)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a document record. Returns whether it existed.
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every distinct owner with at least one document.
    pub async fn owners(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT owner_user_id FROM documents ORDER BY owner_user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("owner_user_id")).collect())
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let file_type: String = row.get("file_type");
    Document {
        id: row.get("id"),
        title: row.get("title"),
        owner_user_id: row.get("owner_user_id"),
        file_type: FileType::from_declared(&file_type),
        embedded_content: row.get("embedded_content"),
        storage_url: row.get("storage_url"),
        session_id: row.get("session_id"),
        timestamp: row.get("timestamp"),
    }
}

#[async_trait]
impl Library for SqliteLibrary {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self, owner_user_id: &str, scope: &LibraryScope) -> Result<Vec<Document>> {
        let rows = match scope {
            LibraryScope::Bookshelf => {
                sqlx::query(&format!(
                    "SELECT {} FROM documents WHERE owner_user_id = ? AND session_id IS NULL ORDER BY id",
                    DOCUMENT_COLUMNS
                ))
                .bind(owner_user_id)
                .fetch_all(&self.pool)
                .await?
            }
            LibraryScope::Session(session_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM documents WHERE owner_user_id = ? AND session_id = ? ORDER BY id",
                    DOCUMENT_COLUMNS
                ))
                .bind(owner_user_id)
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(row_to_document).collect())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct MemoryLibrary {
    docs: RwLock<Vec<Document>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id.
    pub fn insert(&self, doc: Document) {
        let mut docs = self.docs.write().unwrap();
        docs.retain(|d| d.id != doc.id);
        docs.push(doc);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut docs = self.docs.write().unwrap();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        docs.len() != before
    }
}

impl FromIterator<Document> for MemoryLibrary {
    fn from_iter<I: IntoIterator<Item = Document>>(iter: I) -> Self {
        let library = MemoryLibrary::new();
        for doc in iter {
            library.insert(doc);
        }
        library
    }
}

#[async_trait]
impl Library for MemoryLibrary {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().iter().find(|d| d.id == id).cloned())
    }

    async fn list_documents(&self, owner_user_id: &str, scope: &LibraryScope) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .unwrap()
            .iter()
            .filter(|d| d.owner_user_id == owner_user_id && scope.includes(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }
}
