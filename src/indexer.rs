//! Write path into the full-text index.
//!
//! Indexing is best-effort: the record store write that created a document
//! has already succeeded, so nothing here returns an error to the caller.
//! Every failure is logged and counted in the [`IndexReport`]; a document
//! that was not indexed is still served by the retrieval fallback.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::chunk::ChunkingPolicy;
use crate::config::Config;
use crate::extract::{extract_document, DocumentText};
use crate::fetch::ContentFetcher;
use crate::index::IndexGateway;
use crate::library::{Library, LibraryScope};
use crate::models::{normalize_timestamp, Chunk, Document};

/// Outcome of indexing one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    /// Chunks produced by the chunking policy.
    pub chunks: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Why the document produced no chunks at all, if it failed early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexReport {
    fn failed_early(document_id: &str, error: String) -> Self {
        Self {
            document_id: document_id.to_string(),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

pub struct Indexer {
    gateway: Arc<dyn IndexGateway>,
    fetcher: ContentFetcher,
    policy: ChunkingPolicy,
    fetch_timeout: Duration,
}

impl Indexer {
    pub fn new(
        gateway: Arc<dyn IndexGateway>,
        fetcher: ContentFetcher,
        policy: ChunkingPolicy,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            fetcher,
            policy,
            fetch_timeout,
        }
    }

    pub fn from_config(config: &Config, gateway: Arc<dyn IndexGateway>) -> anyhow::Result<Self> {
        let policy = ChunkingPolicy::from_config(&config.chunking)
            .ok_or_else(|| anyhow::anyhow!("invalid [chunking] settings"))?;
        Ok(Self::new(
            gateway,
            ContentFetcher::new()?,
            policy,
            Duration::from_secs(config.fetch.sync_timeout_secs),
        ))
    }

    /// Write one chunk. Returns `false` after logging if the write failed.
    pub async fn index_chunk(&self, chunk: &Chunk) -> bool {
        match self.gateway.upsert(chunk).await {
            Ok(()) => {
                tracing::debug!(chunk_id = %chunk.chunk_id, "indexed chunk");
                true
            }
            Err(e) => {
                tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "failed to index chunk");
                false
            }
        }
    }

    /// Fetch, extract, chunk and upsert a whole document.
    pub async fn index_document(&self, doc: &Document) -> IndexReport {
        let bytes = match self.fetcher.fetch(doc, self.fetch_timeout).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "cannot fetch document for indexing");
                return IndexReport::failed_early(&doc.id, e.to_string());
            }
        };

        let file_type = doc.effective_file_type();
        let text = match tokio::task::spawn_blocking(move || extract_document(&bytes, file_type)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(document_id = %doc.id, error = %e, "cannot extract document for indexing");
                return IndexReport::failed_early(&doc.id, e.to_string());
            }
            Err(e) => {
                tracing::error!(document_id = %doc.id, error = %e, "extraction task failed");
                return IndexReport::failed_early(&doc.id, e.to_string());
            }
        };

        let pages = match &text {
            DocumentText::Paged(pages) => pages.len(),
            DocumentText::Whole(_) => 1,
        };
        let chunks = self
            .policy
            .chunk(doc, &text, normalize_timestamp(doc.timestamp.as_deref()));

        // Chunks from an earlier, longer version of the document would
        // otherwise keep matching. Cleared only once the new text is in hand.
        if !self.gateway.delete_document(&doc.id).await {
            tracing::warn!(document_id = %doc.id, "could not clear previous chunks before re-indexing");
        }

        let mut report = IndexReport {
            document_id: doc.id.clone(),
            chunks: chunks.len(),
            ..IndexReport::default()
        };
        for chunk in &chunks {
            if self.index_chunk(chunk).await {
                report.indexed += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::info!(
            document_id = %doc.id,
            pages,
            chunks = report.chunks,
            failed = report.failed,
            "indexed document"
        );
        report
    }

    /// Remove every chunk of a document from the index.
    pub async fn deindex_document(&self, document_id: &str) -> bool {
        let removed = self.gateway.delete_document(document_id).await;
        if removed {
            tracing::info!(document_id, "removed document from index");
        }
        removed
    }

    /// Index every document `owner_user_id` has in `scope`.
    pub async fn sync_owner(
        &self,
        library: &dyn Library,
        owner_user_id: &str,
        scope: &LibraryScope,
    ) -> anyhow::Result<Vec<IndexReport>> {
        let docs = library.list_documents(owner_user_id, scope).await?;
        tracing::info!(owner = owner_user_id, documents = docs.len(), "syncing library");

        let mut reports = Vec::with_capacity(docs.len());
        for doc in &docs {
            reports.push(self.index_document(doc).await);
        }
        Ok(reports)
    }
}
