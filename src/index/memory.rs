//! In-memory [`IndexGateway`] for tests and single-process use.
//!
//! Chunks live in a `BTreeMap` keyed by chunk id behind `std::sync::RwLock`.
//! Scoring mirrors the OpenSearch query shape closely enough for tests:
//! one point per matching query term, plus the ToC boosts.
//!
//! The index can be switched off with [`InMemoryIndex::set_available`] to
//! exercise the caller's behaviour when the backend is down.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{Chunk, FileType, SearchResult};

use super::{
    leading_snippet, IndexGateway, FALLBACK_SNIPPET_CHARS, TOC_BOOST, TOC_TITLE_BOOST,
    TOC_TITLE_PHRASE,
};

pub struct InMemoryIndex {
    chunks: RwLock<BTreeMap<String, Chunk>>,
    available: AtomicBool,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.read().unwrap().get(chunk_id).cloned()
    }

    /// Ids of every chunk belonging to `document_id`, in id order.
    pub fn chunk_ids_for(&self, document_id: &str) -> Vec<String> {
        self.chunks
            .read()
            .unwrap()
            .values()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.chunk_id.clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable("in-memory index switched off".to_string()))
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexGateway for InMemoryIndex {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        self.check_available()
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), IndexError> {
        self.check_available()?;
        self.chunks
            .write()
            .unwrap()
            .insert(chunk.chunk_id.clone(), chunk.clone());
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> bool {
        if self.check_available().is_err() {
            tracing::warn!(chunk_id, "index delete failed: unavailable");
            return false;
        }
        self.chunks.write().unwrap().remove(chunk_id);
        true
    }

    async fn delete_document(&self, document_id: &str) -> bool {
        if self.check_available().is_err() {
            tracing::warn!(document_id, "index delete-by-query failed: unavailable");
            return false;
        }
        self.chunks
            .write()
            .unwrap()
            .retain(|_, c| c.document_id != document_id);
        true
    }

    async fn search(
        &self,
        query: &str,
        owner_user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        self.check_available()?;

        let terms: Vec<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().unwrap();
        let mut scored: Vec<(f64, &Chunk)> = chunks
            .values()
            .filter(|c| c.owner_user_id == owner_user_id)
            .filter_map(|c| {
                let lower = c.content.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let mut score = matched as f64;
                if c.file_type == FileType::Toc {
                    score += TOC_BOOST;
                }
                if c.title.contains(TOC_TITLE_PHRASE) {
                    score += TOC_TITLE_BOOST;
                }
                Some((score, c))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, c)| SearchResult {
                chunk_id: c.chunk_id.clone(),
                score,
                title: c.title.clone(),
                snippet: highlight(&c.content, &terms),
                full_content: Some(c.content.clone()),
                source_label: c.title.clone(),
                partial: false,
            })
            .collect())
    }
}

/// Wrap the first matching term in `<em>` tags inside a snippet around it.
fn highlight(content: &str, terms: &[String]) -> String {
    let lower = content.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; only highlight when
    // the offsets still line up.
    let first = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()).map(|pos| (pos, t.len())))
        .min_by_key(|(pos, _)| *pos)
        .filter(|_| lower.len() == content.len());

    let Some((pos, len)) = first else {
        return leading_snippet(content, FALLBACK_SNIPPET_CHARS);
    };
    if !content.is_char_boundary(pos) || !content.is_char_boundary(pos + len) {
        return leading_snippet(content, FALLBACK_SNIPPET_CHARS);
    }

    let before: String = {
        let head = &content[..pos];
        let skip = head.chars().count().saturating_sub(FALLBACK_SNIPPET_CHARS / 2);
        head.chars().skip(skip).collect()
    };
    let after: String = content[pos + len..]
        .chars()
        .take(FALLBACK_SNIPPET_CHARS / 2)
        .collect();
    format!("{}<em>{}</em>{}", before, &content[pos..pos + len], after)
}
