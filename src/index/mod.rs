//! Gateway to the full-text index holding document chunks.
//!
//! The [`IndexGateway`] trait is the seam between the retrieval engine and
//! the index backend, so the engine can run against OpenSearch in
//! production and against [`InMemoryIndex`] in tests or single-process
//! deployments.
//!
//! # Contract
//!
//! | Method | Behaviour |
//! |--------|-----------|
//! | [`ensure_schema`](IndexGateway::ensure_schema) | Idempotent; creates the index with the chunk schema if absent |
//! | [`upsert`](IndexGateway::upsert) | Overwrites by chunk id; visible to the next search |
//! | [`delete`](IndexGateway::delete) | Not-found counts as success; failures return `false`, never an error |
//! | [`delete_document`](IndexGateway::delete_document) | Removes every chunk of one document |
//! | [`search`](IndexGateway::search) | Owner is a hard filter; ToC chunks are boosted |

pub mod memory;
pub mod opensearch;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{Chunk, SearchResult};

pub use memory::InMemoryIndex;
pub use opensearch::OpenSearchGateway;

/// Boost for chunks whose `file_type` is `toc`.
pub const TOC_BOOST: f64 = 3.0;
/// Boost for chunks whose title mentions "Table of Contents".
pub const TOC_TITLE_BOOST: f64 = 2.0;
/// Title phrase matched by the secondary boost.
pub const TOC_TITLE_PHRASE: &str = "Table of Contents";
/// Snippet length used when the backend returns no highlight.
pub const FALLBACK_SNIPPET_CHARS: usize = 200;

#[async_trait]
pub trait IndexGateway: Send + Sync {
    /// Create the backing index with the chunk schema if it does not exist.
    async fn ensure_schema(&self) -> Result<(), IndexError>;

    /// Write or overwrite `chunk` under its `chunk_id`.
    async fn upsert(&self, chunk: &Chunk) -> Result<(), IndexError>;

    /// Remove one chunk. Returns `false` (after logging) on failure.
    async fn delete(&self, chunk_id: &str) -> bool;

    /// Remove every chunk whose `book_id` is `document_id`.
    async fn delete_document(&self, document_id: &str) -> bool;

    /// Up to `top_k` chunks owned by `owner_user_id` matching `query`, best first.
    async fn search(
        &self,
        query: &str,
        owner_user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError>;
}

/// Create the gateway selected by `[index].backend`.
///
/// Returns `Ok(None)` for `"disabled"`, in which case every retrieval uses
/// the local scan.
pub fn create_gateway(config: &IndexConfig) -> anyhow::Result<Option<Arc<dyn IndexGateway>>> {
    match config.backend.as_str() {
        "disabled" => Ok(None),
        "memory" => Ok(Some(Arc::new(InMemoryIndex::new()))),
        "opensearch" => Ok(Some(Arc::new(OpenSearchGateway::new(config)?))),
        other => anyhow::bail!("Unknown index backend: {}", other),
    }
}

/// The first `max_chars` characters of `content`.
pub(crate) fn leading_snippet(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
