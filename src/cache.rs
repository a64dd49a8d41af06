//! Process-wide cache of extracted document text and extraction state.
//!
//! Each entry holds the text read so far, the [`ExtractionState`], and the
//! page a background worker should resume from. State transitions are
//! applied under one short-lived `std::sync::Mutex`, which makes
//! [`ExtractionCache::mark_running`] an atomic compare-and-set: of any
//! number of concurrent callers, exactly one wins the right to start a
//! worker for a document.
//!
//! Callers that need to do slow work for a document (fetching, bounded
//! extraction) first take that document's async lock from
//! [`ExtractionCache::document_lock`], so only one cold start per document
//! is in flight at a time.
//!
//! With a capacity set, the least recently used entry is evicted when a new
//! document is inserted; entries whose worker is still running are skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::models::ExtractionState;

/// Snapshot of one document's cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub text: Arc<String>,
    pub state: ExtractionState,
    /// First page not yet extracted, while the document is incomplete.
    pub resume_from: Option<usize>,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            text: Arc::new(String::new()),
            state: ExtractionState::NotStarted,
            resume_from: None,
        }
    }
}

pub struct ExtractionCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: Option<usize>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExtractionCache {
    /// A cache that never evicts.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The entry for `document_id`, created as `NotStarted` on a miss.
    /// Counts as a use for eviction purposes.
    pub fn lookup(&self, document_id: &str) -> CacheEntry {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(document_id) {
            return entry.clone();
        }
        let entry = CacheEntry::empty();
        self.insert(&mut entries, document_id, entry.clone());
        entry
    }

    /// Current state without creating or touching the entry.
    pub fn state(&self, document_id: &str) -> ExtractionState {
        self.entries
            .lock()
            .unwrap()
            .peek(document_id)
            .map(|e| e.state)
            .unwrap_or(ExtractionState::NotStarted)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store the text of a bounded extraction. `resume_from` is the first
    /// page left unread.
    pub fn set_partial(&self, document_id: &str, text: String, resume_from: Option<usize>) {
        self.update(document_id, |entry| {
            entry.text = Arc::new(text);
            entry.state = ExtractionState::PartiallyExtracted;
            entry.resume_from = resume_from;
        });
    }

    /// Store the full text of a document that needs no background work.
    pub fn set_completed(&self, document_id: &str, text: String) {
        self.update(document_id, |entry| {
            entry.text = Arc::new(text);
            entry.state = ExtractionState::Completed;
            entry.resume_from = None;
        });
    }

    /// Move `PartiallyExtracted` to `BackgroundRunning`.
    ///
    /// Returns `false` if the document is in any other state, in which case
    /// the caller must not start a worker.
    pub fn mark_running(&self, document_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.peek_mut(document_id) {
            Some(entry) if entry.state == ExtractionState::PartiallyExtracted => {
                entry.state = ExtractionState::BackgroundRunning;
                true
            }
            _ => false,
        }
    }

    /// Undo [`mark_running`](Self::mark_running) when the worker could not
    /// be queued. A later query may try again.
    pub fn revert_running(&self, document_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.peek_mut(document_id) {
            if entry.state == ExtractionState::BackgroundRunning {
                entry.state = ExtractionState::PartiallyExtracted;
            }
        }
    }

    /// Concatenate the remainder produced by a worker and mark the document
    /// `Completed`.
    pub fn append_background(&self, document_id: &str, text: &str) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.peek_mut(document_id) else {
            tracing::debug!(document_id, "cache entry gone before background text arrived");
            return;
        };
        let mut combined = String::with_capacity(entry.text.len() + text.len() + 1);
        combined.push_str(&entry.text);
        if !combined.is_empty() && !text.is_empty() {
            combined.push('\n');
        }
        combined.push_str(text);
        entry.text = Arc::new(combined);
        entry.state = ExtractionState::Completed;
        entry.resume_from = None;
    }

    /// Mark the document `Failed`, keeping any text already cached.
    pub fn mark_failed(&self, document_id: &str) {
        self.update(document_id, |entry| {
            entry.state = ExtractionState::Failed;
            entry.resume_from = None;
        });
    }

    /// The async lock serializing cold starts for `document_id`.
    pub fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(document_id.to_string())
            .or_default()
            .clone()
    }

    fn update(&self, document_id: &str, apply: impl FnOnce(&mut CacheEntry)) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(document_id) {
            apply(entry);
            return;
        }
        let mut entry = CacheEntry::empty();
        apply(&mut entry);
        self.insert(&mut entries, document_id, entry);
    }

    fn insert(&self, entries: &mut LruCache<String, CacheEntry>, document_id: &str, entry: CacheEntry) {
        if let Some(capacity) = self.capacity {
            while entries.len() >= capacity {
                let victim = entries
                    .iter()
                    .rev()
                    .find(|(_, e)| e.state != ExtractionState::BackgroundRunning)
                    .map(|(k, _)| k.clone());
                let Some(victim) = victim else { break };
                entries.pop(&victim);
                self.forget_lock(&victim);
                tracing::debug!(document_id = %victim, "evicted extracted text");
            }
        }
        entries.put(document_id.to_string(), entry);
    }

    fn forget_lock(&self, document_id: &str) {
        let mut locks = self.locks.lock().unwrap();
        // Keep the lock while someone still holds or waits on it.
        if locks
            .get(document_id)
            .map(|l| Arc::strong_count(l) == 1)
            .unwrap_or(false)
        {
            locks.remove(document_id);
        }
    }
}

impl Default for ExtractionCache {
    fn default() -> Self {
        Self::unbounded()
    }
}
