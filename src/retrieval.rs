//! Hybrid retrieval: the full-text index first, a local scan when it misses.
//!
//! A query goes through these steps:
//!
//! ```text
//! TryIndex ──hit──▶ return index hits as-is
//!    │
//!   miss / unavailable / no owner
//!    ▼
//! Fallback: for each of the owner's candidate documents
//!    cache lookup ─▶ (cold) fetch + read first N pages ─▶ queue the rest
//!    split cached text into windows ─▶ score by distinct query terms
//!    ▼
//! Aggregate: sort by score, truncate to top_k
//! ```
//!
//! Index hits and scanned windows are never mixed in one response. The
//! scan path never fails: a document that cannot be fetched or read is
//! skipped, so the worst case is an empty result list.
//!
//! # Cold documents
//!
//! The first time a PDF is scanned only its first `initial_page_limit`
//! pages are read, under a timeout, while the query waits. The remaining
//! pages are handed to the [`ExtractionPool`]. Until that finishes, every
//! window from the document carries [`PARTIAL_CAVEAT`] and `partial: true`.
//! Other document types are read whole and never go to the pool.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheEntry, ExtractionCache};
use crate::chunk::split_windows;
use crate::config::Config;
use crate::error::{ExtractionError, SubmitError};
use crate::extract::{extract_text, extract_text_cancellable, Extraction, PageWindow};
use crate::fetch::ContentFetcher;
use crate::index::IndexGateway;
use crate::library::{Library, LibraryScope};
use crate::models::{Document, ExtractionState, FileType, SearchResult};
use crate::worker::{ExtractionJob, ExtractionPool};

/// Appended to windows of documents whose remaining pages are still being read.
pub const PARTIAL_CAVEAT: &str = "\n[Note: still reading rest of document]";

/// Tunables for one engine, usually taken from `[retrieval]`, `[fetch]`
/// and `[index]`.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub initial_page_limit: usize,
    pub window_chars: usize,
    pub window_overlap: usize,
    pub min_window_chars: usize,
    pub snippet_chars: usize,
    pub extraction_timeout: Duration,
    pub fetch_timeout: Duration,
    pub index_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            initial_page_limit: 50,
            window_chars: 800,
            window_overlap: 150,
            min_window_chars: 50,
            snippet_chars: 200,
            extraction_timeout: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(10),
            index_timeout: Duration::from_secs(5),
        }
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            initial_page_limit: r.initial_page_limit,
            window_chars: r.window_chars,
            window_overlap: r.window_overlap,
            min_window_chars: r.min_window_chars,
            snippet_chars: r.snippet_chars,
            extraction_timeout: Duration::from_secs(r.extraction_timeout_secs),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
            index_timeout: config.index.timeout(),
        }
    }
}

pub struct RetrievalEngine {
    index: Option<Arc<dyn IndexGateway>>,
    cache: Arc<ExtractionCache>,
    pool: Arc<ExtractionPool>,
    fetcher: ContentFetcher,
    settings: RetrievalSettings,
}

/// A scored window before aggregation. Kept apart from [`SearchResult`]
/// so ties can be broken by position rather than by the formatted id.
struct ScoredWindow {
    score: usize,
    document_id: String,
    window: usize,
    result: SearchResult,
}

impl RetrievalEngine {
    pub fn new(
        index: Option<Arc<dyn IndexGateway>>,
        cache: Arc<ExtractionCache>,
        pool: Arc<ExtractionPool>,
        fetcher: ContentFetcher,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            index,
            cache,
            pool,
            fetcher,
            settings,
        }
    }

    /// Build an engine from configuration and start its extraction workers.
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &Config, index: Option<Arc<dyn IndexGateway>>) -> anyhow::Result<Self> {
        let cache = Arc::new(ExtractionCache::with_capacity(config.extraction.cache_capacity));
        let pool = Arc::new(ExtractionPool::start(
            cache.clone(),
            config.extraction.workers,
            config.extraction.queue_depth,
        ));
        Ok(Self::new(
            index,
            cache,
            pool,
            ContentFetcher::new()?,
            RetrievalSettings::from_config(config),
        ))
    }

    pub fn cache(&self) -> &Arc<ExtractionCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<ExtractionPool> {
        &self.pool
    }

    /// Best passages for `query` among `owner_user_id`'s documents.
    ///
    /// `candidates` are the documents to scan if the index misses; any not
    /// owned by `owner_user_id` are ignored. An empty owner skips the index
    /// and scans `candidates` as given.
    pub async fn retrieve(
        &self,
        query: &str,
        owner_user_id: &str,
        candidates: &[Document],
        top_k: usize,
    ) -> Vec<SearchResult> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        if let Some(hits) = self.try_index(query, owner_user_id, top_k).await {
            return hits;
        }

        self.scan(query, owner_user_id, candidates, top_k).await
    }

    /// [`retrieve`](Self::retrieve) with candidates listed from `library`
    /// only when the index misses.
    pub async fn retrieve_library(
        &self,
        library: &dyn Library,
        query: &str,
        owner_user_id: &str,
        scope: &LibraryScope,
        top_k: usize,
    ) -> Vec<SearchResult> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        if let Some(hits) = self.try_index(query, owner_user_id, top_k).await {
            return hits;
        }

        // Listing is only needed for the scan, and must not fail the call.
        let candidates = match library.list_documents(owner_user_id, scope).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(owner = owner_user_id, error = %e, "cannot list library documents");
                return Vec::new();
            }
        };
        self.scan(query, owner_user_id, &candidates, top_k).await
    }

    async fn try_index(&self, query: &str, owner_user_id: &str, top_k: usize) -> Option<Vec<SearchResult>> {
        let index = self.index.as_ref()?;
        if owner_user_id.is_empty() {
            return None;
        }

        match tokio::time::timeout(self.settings.index_timeout, index.search(query, owner_user_id, top_k)).await {
            Ok(Ok(hits)) if !hits.is_empty() => {
                tracing::debug!(owner = owner_user_id, hits = hits.len(), "index hit");
                Some(hits)
            }
            Ok(Ok(_)) => {
                tracing::debug!(owner = owner_user_id, "index miss, scanning documents");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "index search failed, scanning documents");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.index_timeout.as_secs(),
                    "index search timed out, scanning documents"
                );
                None
            }
        }
    }

    async fn scan(
        &self,
        query: &str,
        owner_user_id: &str,
        candidates: &[Document],
        top_k: usize,
    ) -> Vec<SearchResult> {
        let terms: BTreeSet<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();

        let mut scored = Vec::new();
        for doc in candidates {
            if !owner_user_id.is_empty() && doc.owner_user_id != owner_user_id {
                continue;
            }
            let Some(entry) = self.prepare(doc).await else {
                continue;
            };
            self.score_windows(doc, &entry, &terms, &mut scored);
        }

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.window.cmp(&b.window))
        });
        scored.truncate(top_k);
        scored.into_iter().map(|s| s.result).collect()
    }

    /// Make sure the cache holds whatever text can be had for `doc`.
    /// Returns `None` when the document has nothing to scan.
    async fn prepare(&self, doc: &Document) -> Option<CacheEntry> {
        let entry = self.cache.lookup(&doc.id);
        if needs_work(&entry) {
            let lock = self.cache.document_lock(&doc.id);
            let _guard = lock.lock().await;

            // Another query may have done the work while we waited.
            let entry = self.cache.lookup(&doc.id);
            if needs_cold_start(&entry) {
                self.cold_start(doc).await;
            } else if let (ExtractionState::PartiallyExtracted, Some(resume_from)) =
                (entry.state, entry.resume_from)
            {
                self.resume(doc, resume_from).await;
            }
        }

        let entry = self.cache.lookup(&doc.id);
        if entry.text.is_empty() {
            return None;
        }
        Some(entry)
    }

    /// Fetch the document and read its first pages while the query waits.
    async fn cold_start(&self, doc: &Document) {
        let bytes = match self.fetcher.fetch(doc, self.settings.fetch_timeout).await {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "cannot fetch document, skipping");
                self.cache.mark_failed(&doc.id);
                return;
            }
        };

        let file_type = doc.effective_file_type();
        if file_type != FileType::Pdf {
            match extract_text(&bytes, file_type, PageWindow::all()) {
                Ok(extraction) => self.cache.set_completed(&doc.id, extraction.text),
                Err(e) => {
                    tracing::warn!(document_id = %doc.id, error = %e, "cannot read document, skipping");
                    self.cache.mark_failed(&doc.id);
                }
            }
            return;
        }

        match self.bounded_extraction(bytes.clone()).await {
            Ok(Extraction {
                text,
                next_page: Some(next_page),
                total_pages,
            }) => {
                tracing::debug!(
                    document_id = %doc.id,
                    next_page,
                    total_pages,
                    "read first pages, queueing the rest"
                );
                self.cache.set_partial(&doc.id, text, Some(next_page));
                self.spawn_remainder(doc, bytes, next_page);
            }
            Ok(extraction) => self.cache.set_completed(&doc.id, extraction.text),
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "cannot read document, skipping");
                self.cache.mark_failed(&doc.id);
            }
        }
    }

    /// Queue the remainder again after an earlier submit was rejected.
    async fn resume(&self, doc: &Document, resume_from: usize) {
        match self.fetcher.fetch(doc, self.settings.fetch_timeout).await {
            Ok(bytes) => self.spawn_remainder(doc, Arc::new(bytes), resume_from),
            Err(e) => {
                tracing::debug!(document_id = %doc.id, error = %e, "cannot refetch document to resume extraction");
            }
        }
    }

    async fn bounded_extraction(&self, bytes: Arc<Vec<u8>>) -> Result<Extraction, ExtractionError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let window = PageWindow::first(self.settings.initial_page_limit);
        let task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || extract_text_cancellable(&bytes, FileType::Pdf, window, &cancel)
        });

        match tokio::time::timeout(self.settings.extraction_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExtractionError::Task(e.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(ExtractionError::TimedOut(self.settings.extraction_timeout.as_secs()))
            }
        }
    }

    /// Hand the pages from `resume_from` onwards to the pool, unless a
    /// worker already owns this document.
    fn spawn_remainder(&self, doc: &Document, bytes: Arc<Vec<u8>>, resume_from: usize) {
        if !self.cache.mark_running(&doc.id) {
            return;
        }
        let job = ExtractionJob {
            document_id: doc.id.clone(),
            bytes,
            file_type: FileType::Pdf,
            resume_from,
        };
        match self.pool.submit(job) {
            Ok(()) => {}
            Err(e) => {
                self.cache.revert_running(&doc.id);
                match e {
                    SubmitError::Saturated => tracing::warn!(
                        document_id = %doc.id,
                        "extraction queue full, remaining pages will be read on a later query"
                    ),
                    SubmitError::Closed => {
                        tracing::error!(document_id = %doc.id, "extraction pool closed")
                    }
                }
            }
        }
    }

    fn score_windows(
        &self,
        doc: &Document,
        entry: &CacheEntry,
        terms: &BTreeSet<String>,
        out: &mut Vec<ScoredWindow>,
    ) {
        let partial = entry.state == ExtractionState::BackgroundRunning;
        let windows = split_windows(
            &entry.text,
            self.settings.window_chars,
            self.settings.window_overlap,
            self.settings.min_window_chars,
        );

        for (n, window) in windows.into_iter().enumerate() {
            let score = term_overlap(window, terms);
            if score == 0 {
                continue;
            }
            let mut content = window.to_string();
            if partial {
                content.push_str(PARTIAL_CAVEAT);
            }
            out.push(ScoredWindow {
                score,
                document_id: doc.id.clone(),
                window: n,
                result: SearchResult {
                    chunk_id: format!("{}_window_{}", doc.id, n),
                    score: score as f64,
                    title: doc.title.clone(),
                    snippet: window.trim().chars().take(self.settings.snippet_chars).collect(),
                    full_content: Some(content),
                    source_label: doc.title.clone(),
                    partial,
                },
            });
        }
    }
}

fn needs_cold_start(entry: &CacheEntry) -> bool {
    match entry.state {
        ExtractionState::NotStarted => true,
        // A failed document with nothing cached is retried on a later query.
        ExtractionState::Failed => entry.text.is_empty(),
        _ => false,
    }
}

fn needs_work(entry: &CacheEntry) -> bool {
    needs_cold_start(entry)
        || (entry.state == ExtractionState::PartiallyExtracted && entry.resume_from.is_some())
}

/// Number of distinct `terms` occurring in `window`, case-insensitively.
pub fn term_overlap(window: &str, terms: &BTreeSet<String>) -> usize {
    let lower = window.to_lowercase();
    terms.iter().filter(|t| lower.contains(t.as_str())).count()
}
