//! Core data models used throughout the retrieval engine.
//!
//! These types represent the library documents consumed from the record
//! store, the chunks written to the full-text index, the per-document
//! extraction state, and the search results handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a stored document (or of an indexed chunk).
///
/// `Toc` only ever appears on the synthetic table-of-contents chunk; a
/// document never declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Text,
    Toc,
    Other,
}

impl FileType {
    /// Parse the loosely-typed file type strings found in document records
    /// (`"pdf"`, `"application/pdf"`, `"text"`, `"text/plain"`, ...).
    pub fn from_declared(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "pdf" | "application/pdf" => FileType::Pdf,
            "text" | "txt" | "text/plain" | "md" | "text/markdown" => FileType::Text,
            _ if lowered.contains("pdf") => FileType::Pdf,
            _ => FileType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Text => "text",
            FileType::Toc => "toc",
            FileType::Other => "other",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document record owned by one user, read from the record store.
///
/// Exactly one of `embedded_content` (base64) or `storage_url` is normally
/// set. The retrieval core never mutates documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub owner_user_id: String,
    pub file_type: FileType,
    #[serde(default)]
    pub embedded_content: Option<String>,
    #[serde(default)]
    pub storage_url: Option<String>,
    /// Session the document was added to, if it is session-scoped.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Raw timestamp from the record store; may be missing or empty.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Document {
    /// Whether the document should be read page by page.
    ///
    /// Records often declare a generic type for PDFs uploaded to storage,
    /// so the storage URL suffix is consulted as well.
    pub fn is_pdf(&self) -> bool {
        self.file_type == FileType::Pdf
            || self
                .storage_url
                .as_deref()
                .map(|u| u.to_ascii_lowercase().ends_with(".pdf"))
                .unwrap_or(false)
    }

    /// The file type extraction should use for this document's bytes.
    pub fn effective_file_type(&self) -> FileType {
        if self.is_pdf() {
            FileType::Pdf
        } else {
            self.file_type
        }
    }
}

/// A bounded span of a document, indexed as one retrievable unit.
///
/// Serializes to the index schema field names (`chunk_id`, `book_id`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    #[serde(rename = "book_id")]
    pub document_id: String,
    pub title: String,
    pub content: String,
    pub page_start: u32,
    pub page_end: u32,
    pub file_type: FileType,
    #[serde(default)]
    pub storage_url: String,
    #[serde(rename = "user_id")]
    pub owner_user_id: String,
    #[serde(rename = "timestamp")]
    pub indexed_at: DateTime<Utc>,
}

/// Deterministic id of the `n`th page chunk of a document.
pub fn page_chunk_id(document_id: &str, n: usize) -> String {
    format!("{}_chunk_{}", document_id, n)
}

/// Deterministic id of a document's table-of-contents chunk.
pub fn toc_chunk_id(document_id: &str) -> String {
    format!("{}_toc", document_id)
}

/// Normalize a record-store timestamp for indexing.
///
/// The index rejects empty dates, so a missing, empty, or unparseable value
/// becomes the current time.
pub fn normalize_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
        })
        .unwrap_or_else(Utc::now)
}

/// Per-document extraction progress, owned by the extraction cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    NotStarted,
    PartiallyExtracted,
    BackgroundRunning,
    Completed,
    Failed,
}

impl ExtractionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionState::Completed | ExtractionState::Failed)
    }
}

/// A ranked passage returned by `retrieve`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Backend relevance score, or the distinct query-term count on the scan path.
    pub score: f64,
    pub title: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    /// Alias of `title`, used for attribution when building prompts.
    pub source_label: String,
    /// Set when the passage came from a document that is still being read.
    #[serde(default)]
    pub partial: bool,
}
