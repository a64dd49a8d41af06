mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bookshelf_retrieval::cache::ExtractionCache;
use bookshelf_retrieval::error::IndexError;
use bookshelf_retrieval::fetch::ContentFetcher;
use bookshelf_retrieval::index::{IndexGateway, InMemoryIndex};
use bookshelf_retrieval::library::{LibraryScope, MemoryLibrary};
use bookshelf_retrieval::models::{normalize_timestamp, Chunk, Document, ExtractionState, FileType, SearchResult};
use bookshelf_retrieval::retrieval::{RetrievalEngine, RetrievalSettings, PARTIAL_CAVEAT};
use bookshelf_retrieval::worker::ExtractionPool;

use common::{book_pages, pdf_document, text_document, wait_for_state};

/// Wraps an index and counts searches.
struct CountingGateway {
    inner: InMemoryIndex,
    searches: AtomicUsize,
}

impl CountingGateway {
    fn new(inner: InMemoryIndex) -> Self {
        Self {
            inner,
            searches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IndexGateway for CountingGateway {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        self.inner.ensure_schema().await
    }
    async fn upsert(&self, chunk: &Chunk) -> Result<(), IndexError> {
        self.inner.upsert(chunk).await
    }
    async fn delete(&self, chunk_id: &str) -> bool {
        self.inner.delete(chunk_id).await
    }
    async fn delete_document(&self, document_id: &str) -> bool {
        self.inner.delete_document(document_id).await
    }
    async fn search(
        &self,
        query: &str,
        owner_user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, owner_user_id, top_k).await
    }
}

fn settings() -> RetrievalSettings {
    RetrievalSettings {
        fetch_timeout: Duration::from_secs(2),
        ..RetrievalSettings::default()
    }
}

/// Engine whose pool has no workers, so background work stays queued
/// until the test starts a worker.
fn idle_engine(index: Option<Arc<dyn IndexGateway>>, queue_depth: usize) -> RetrievalEngine {
    let cache = Arc::new(ExtractionCache::unbounded());
    let pool = Arc::new(ExtractionPool::new(cache.clone(), queue_depth));
    RetrievalEngine::new(index, cache, pool, ContentFetcher::new().unwrap(), settings())
}

fn chunk(id: &str, doc: &str, owner: &str, content: &str) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        document_id: doc.to_string(),
        title: format!("{} (pages 1-5)", doc),
        content: content.to_string(),
        page_start: 1,
        page_end: 5,
        file_type: FileType::Pdf,
        storage_url: String::new(),
        owner_user_id: owner.to_string(),
        indexed_at: normalize_timestamp(None),
    }
}

#[tokio::test]
async fn cold_pdf_is_read_lazily_and_completes_in_background() {
    let engine = idle_engine(None, 4);
    let pages = book_pages(80, &[(4, "precalculus chapter"), (80, "zeppelin appendix")]);
    let doc = pdf_document("calc", "alice", "Calculus", &pages);
    let candidates = vec![doc];

    let first = engine
        .retrieve("precalculus chapter", "alice", &candidates, 5)
        .await;
    assert!(!first.is_empty());
    assert!(first[0].partial);
    assert!(first[0].full_content.as_deref().unwrap().ends_with(PARTIAL_CAVEAT));
    assert!(first[0].chunk_id.starts_with("calc_window_"));
    assert_eq!(first[0].score, 2.0);
    assert_eq!(engine.cache().state("calc"), ExtractionState::BackgroundRunning);
    assert_eq!(engine.pool().queued(), 1);

    // Page 80 has not been read yet.
    let late = engine.retrieve("zeppelin", "alice", &candidates, 5).await;
    assert!(late.is_empty());

    engine.pool().start_workers(1);
    assert!(wait_for_state(engine.cache(), "calc", ExtractionState::Completed).await);

    let late = engine.retrieve("zeppelin", "alice", &candidates, 5).await;
    assert!(!late.is_empty());
    for hit in &late {
        let content = hit.full_content.as_deref().unwrap();
        assert!(!hit.partial);
        assert!(content.contains("zeppelin"));
        assert!(!content.contains(PARTIAL_CAVEAT));
    }
}

#[tokio::test]
async fn short_pdf_completes_without_background_work() {
    let engine = idle_engine(None, 4);
    let pages = book_pages(12, &[(4, "precalculus chapter")]);
    let candidates = vec![pdf_document("short", "alice", "Short", &pages)];

    let results = engine.retrieve("precalculus", "alice", &candidates, 5).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].partial);
    assert_eq!(engine.cache().state("short"), ExtractionState::Completed);
    assert_eq!(engine.pool().queued(), 0);
}

#[tokio::test]
async fn index_hits_skip_the_scan() {
    let index = InMemoryIndex::new();
    index
        .upsert(&chunk("calc_chunk_0", "calc", "alice", "precalculus chapter one"))
        .await
        .unwrap();
    let gateway = Arc::new(CountingGateway::new(index));
    let engine = idle_engine(Some(gateway.clone()), 4);

    let pages = book_pages(3, &[(1, "precalculus")]);
    let candidates = vec![pdf_document("other", "alice", "Other", &pages)];

    let results = engine.retrieve("precalculus", "alice", &candidates, 5).await;
    assert_eq!(gateway.searches.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "calc_chunk_0");
    // The candidate was never looked at.
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn index_miss_falls_back_to_scan() {
    let gateway = Arc::new(CountingGateway::new(InMemoryIndex::new()));
    let engine = idle_engine(Some(gateway.clone()), 4);
    let candidates = vec![text_document(
        "notes",
        "alice",
        "Notes",
        "Lecture notes on the precalculus chapter about limits and continuity.",
    )];

    let results = engine.retrieve("limits", "alice", &candidates, 5).await;
    assert_eq!(gateway.searches.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "notes_window_0");
    assert_eq!(results[0].source_label, "Notes");
}

#[tokio::test]
async fn unavailable_index_falls_back_to_scan() {
    let index = InMemoryIndex::new();
    index.set_available(false);
    let engine = idle_engine(Some(Arc::new(index)), 4);
    let candidates = vec![text_document(
        "notes",
        "alice",
        "Notes",
        "Integration by parts shows up in every calculus exam we have seen.",
    )];

    let results = engine.retrieve("integration", "alice", &candidates, 5).await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn other_owners_never_leak() {
    let index = InMemoryIndex::new();
    index
        .upsert(&chunk("bob_chunk_0", "bobdoc", "bob", "precalculus chapter precalculus"))
        .await
        .unwrap();
    let engine = idle_engine(Some(Arc::new(index)), 4);

    let candidates = vec![
        text_document(
            "bobnotes",
            "bob",
            "Bob",
            "precalculus chapter with every query term the user could want",
        ),
        text_document(
            "alicenotes",
            "alice",
            "Alice",
            "a short note mentioning the chapter on sequences and series",
        ),
    ];

    let results = engine
        .retrieve("precalculus chapter", "alice", &candidates, 10)
        .await;
    assert_eq!(results.len(), 1);
    assert!(results[0].chunk_id.starts_with("alicenotes_"));
    assert_eq!(engine.cache().state("bobnotes"), ExtractionState::NotStarted);
}

#[tokio::test]
async fn text_documents_are_never_backgrounded() {
    let engine = idle_engine(None, 4);
    let candidates = vec![text_document(
        "notes",
        "alice",
        "Notes",
        &"Derivatives measure rates of change along a curve. ".repeat(40),
    )];

    let results = engine.retrieve("derivatives", "alice", &candidates, 50).await;
    assert!(results.len() > 1);
    assert!(results.iter().all(|r| !r.partial));
    assert_eq!(engine.cache().state("notes"), ExtractionState::Completed);
    assert_eq!(engine.pool().queued(), 0);
}

#[tokio::test]
async fn ties_break_by_document_then_position() {
    let engine = idle_engine(None, 4);
    let body = "A paragraph about vectors and their dot products in the plane.";
    let candidates = vec![
        text_document("b", "alice", "B", body),
        text_document("a", "alice", "A", body),
    ];

    let results = engine.retrieve("vectors", "alice", &candidates, 10).await;
    let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["a_window_0", "b_window_0"]);

    let top = engine.retrieve("vectors", "alice", &candidates, 1).await;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].chunk_id, "a_window_0");
}

#[tokio::test]
async fn more_matching_terms_rank_higher() {
    let engine = idle_engine(None, 4);
    let candidates = vec![
        text_document("a", "alice", "A", "This note covers the limits of sequences in general terms."),
        text_document("b", "alice", "B", "Here the precalculus chapter on limits of functions begins."),
    ];

    let results = engine
        .retrieve("precalculus chapter limits", "alice", &candidates, 10)
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_id, "b_window_0");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn concurrent_queries_start_one_worker_per_document() {
    let engine = Arc::new(idle_engine(None, 8));
    let pages = book_pages(60, &[(2, "eigenvalues")]);
    let candidates = Arc::new(vec![pdf_document("linalg", "alice", "Linear Algebra", &pages)]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let candidates = candidates.clone();
        handles.push(tokio::spawn(async move {
            engine.retrieve("eigenvalues", "alice", &candidates, 5).await
        }));
    }
    for handle in handles {
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].partial);
    }

    assert_eq!(engine.pool().queued(), 1);
    assert_eq!(engine.cache().state("linalg"), ExtractionState::BackgroundRunning);
}

#[tokio::test]
async fn saturated_pool_defers_and_later_query_resumes() {
    let engine = idle_engine(None, 1);
    let pages_a = book_pages(55, &[(1, "matrices")]);
    let pages_b = book_pages(55, &[(1, "matrices")]);
    let candidates = vec![
        pdf_document("a", "alice", "A", &pages_a),
        pdf_document("b", "alice", "B", &pages_b),
    ];

    let results = engine.retrieve("matrices", "alice", &candidates, 10).await;
    assert_eq!(results.len(), 2);
    assert_eq!(engine.cache().state("a"), ExtractionState::BackgroundRunning);
    // The queue was full, so b keeps its first pages and waits.
    assert_eq!(engine.cache().state("b"), ExtractionState::PartiallyExtracted);
    assert!(results.iter().find(|r| r.chunk_id.starts_with("b_")).map(|r| !r.partial).unwrap());

    engine.pool().start_workers(1);
    assert!(wait_for_state(engine.cache(), "a", ExtractionState::Completed).await);

    engine.retrieve("matrices", "alice", &candidates, 10).await;
    assert!(wait_for_state(engine.cache(), "b", ExtractionState::Completed).await);
}

#[tokio::test]
async fn unreachable_document_is_skipped() {
    let engine = idle_engine(None, 4);
    let broken = Document {
        id: "gone".to_string(),
        title: "Gone".to_string(),
        owner_user_id: "alice".to_string(),
        file_type: FileType::Pdf,
        embedded_content: None,
        storage_url: Some("http://127.0.0.1:9/gone.pdf".to_string()),
        session_id: None,
        timestamp: None,
    };
    let candidates = vec![
        broken,
        text_document("ok", "alice", "Ok", "Probability spaces and random variables explained."),
    ];

    let results = engine.retrieve("probability", "alice", &candidates, 5).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "ok_window_0");
    assert_eq!(engine.cache().state("gone"), ExtractionState::Failed);
}

#[tokio::test]
async fn corrupt_pdf_is_skipped() {
    let engine = idle_engine(None, 4);
    let mut doc = text_document("bad", "alice", "Bad", "%PDF-1.4 garbage");
    doc.file_type = FileType::Pdf;

    let results = engine.retrieve("garbage", "alice", &[doc], 5).await;
    assert!(results.is_empty());
    assert_eq!(engine.cache().state("bad"), ExtractionState::Failed);
}

#[tokio::test]
async fn library_candidates_follow_scope() {
    let engine = idle_engine(None, 4);
    let mut session_doc = text_document(
        "s1doc",
        "alice",
        "Session upload",
        "Uploaded during the session: notes on conic sections and ellipses.",
    );
    session_doc.session_id = Some("s1".to_string());
    let library: MemoryLibrary = vec![
        text_document(
            "shelf",
            "alice",
            "Shelf book",
            "Shelf book chapter on conic sections, parabolas and hyperbolas.",
        ),
        session_doc,
    ]
    .into_iter()
    .collect();

    let shelf = engine
        .retrieve_library(&library, "conic", "alice", &LibraryScope::Bookshelf, 5)
        .await;
    assert_eq!(shelf.len(), 1);
    assert_eq!(shelf[0].chunk_id, "shelf_window_0");

    let session = engine
        .retrieve_library(&library, "conic", "alice", &LibraryScope::Session("s1".to_string()), 5)
        .await;
    assert_eq!(session.len(), 1);
    assert_eq!(session[0].chunk_id, "s1doc_window_0");
}
