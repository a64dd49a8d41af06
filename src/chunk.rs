//! Page-bounded chunking for the index, and character windows for the scan.
//!
//! Paged documents are cut into overlapping page ranges: `pages_per_chunk`
//! pages per chunk, advancing by `pages_per_chunk - overlap_pages`. One
//! extra table-of-contents chunk covers the first `toc_page_limit` pages
//! and carries a fixed banner so it can be matched and boosted. Unpaged
//! documents become a single chunk.
//!
//! Chunk ids depend only on the document id and the chunk's position, so
//! re-indexing the same text overwrites the same index entries.
//!
//! # Example
//!
//! ```text
//! 12 pages, 5 per chunk, overlap 2  →  [1-5] [4-8] [7-11] [10-12] + ToC [1-12]
//! ```

use chrono::{DateTime, Utc};

use crate::config::ChunkingConfig;
use crate::extract::DocumentText;
use crate::models::{page_chunk_id, toc_chunk_id, Chunk, Document, FileType};

/// Prefix of every table-of-contents chunk's content.
pub const TOC_BANNER: &str = "TABLE OF CONTENTS CHAPTER LIST OUTLINE STRUCTURE:\n";

/// Suffix of every table-of-contents chunk's title.
pub const TOC_TITLE_SUFFIX: &str = " - Table of Contents Structure Chapter List";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    pages_per_chunk: usize,
    overlap_pages: usize,
    toc_page_limit: usize,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            pages_per_chunk: 5,
            overlap_pages: 2,
            toc_page_limit: 15,
        }
    }
}

impl ChunkingPolicy {
    /// Returns `None` when `overlap_pages >= pages_per_chunk`, which would
    /// never advance.
    pub fn new(pages_per_chunk: usize, overlap_pages: usize, toc_page_limit: usize) -> Option<Self> {
        (pages_per_chunk > 0 && overlap_pages < pages_per_chunk).then_some(Self {
            pages_per_chunk,
            overlap_pages,
            toc_page_limit,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Option<Self> {
        Self::new(
            config.pages_per_chunk,
            config.overlap_pages,
            config.toc_page_limit,
        )
    }

    pub fn stride(&self) -> usize {
        self.pages_per_chunk - self.overlap_pages
    }

    /// Chunk a fully extracted document.
    pub fn chunk(&self, doc: &Document, text: &DocumentText, indexed_at: DateTime<Utc>) -> Vec<Chunk> {
        match text {
            DocumentText::Paged(pages) => self.chunk_pages(doc, pages, indexed_at),
            DocumentText::Whole(body) => whole_chunk(doc, body, indexed_at).into_iter().collect(),
        }
    }

    fn chunk_pages(&self, doc: &Document, pages: &[String], indexed_at: DateTime<Utc>) -> Vec<Chunk> {
        let total_pages = pages.len();
        let storage_url = doc.storage_url.clone().unwrap_or_default();
        let mut chunks = Vec::new();

        for start in (0..total_pages).step_by(self.stride()) {
            let end = (start + self.pages_per_chunk).min(total_pages);
            let content = join_pages(&pages[start..end]);
            if content.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk {
                chunk_id: page_chunk_id(&doc.id, chunks.len()),
                document_id: doc.id.clone(),
                title: format!("{} (pages {}-{})", doc.title, start + 1, end),
                content,
                page_start: (start + 1) as u32,
                page_end: end as u32,
                file_type: doc.effective_file_type(),
                storage_url: storage_url.clone(),
                owner_user_id: doc.owner_user_id.clone(),
                indexed_at,
            });
        }

        // An empty document still gets a ToC chunk with an empty range.
        let toc_end = self.toc_page_limit.min(total_pages);
        let mut content = String::from(TOC_BANNER);
        content.push_str(&join_pages(&pages[..toc_end]));
        chunks.push(Chunk {
            chunk_id: toc_chunk_id(&doc.id),
            document_id: doc.id.clone(),
            title: format!("{}{}", doc.title, TOC_TITLE_SUFFIX),
            content,
            page_start: if toc_end == 0 { 0 } else { 1 },
            page_end: toc_end as u32,
            file_type: FileType::Toc,
            storage_url,
            owner_user_id: doc.owner_user_id.clone(),
            indexed_at,
        });

        chunks
    }
}

fn whole_chunk(doc: &Document, body: &str, indexed_at: DateTime<Utc>) -> Option<Chunk> {
    if body.trim().is_empty() {
        return None;
    }
    Some(Chunk {
        chunk_id: page_chunk_id(&doc.id, 0),
        document_id: doc.id.clone(),
        title: doc.title.clone(),
        content: body.to_string(),
        page_start: 1,
        page_end: 1,
        file_type: doc.file_type,
        storage_url: doc.storage_url.clone().unwrap_or_default(),
        owner_user_id: doc.owner_user_id.clone(),
        indexed_at,
    })
}

fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for page in pages {
        out.push_str(page);
        out.push('\n');
    }
    out
}

/// Split text into overlapping windows of `size` characters.
///
/// Windows start every `size - overlap` characters; a window whose trimmed
/// text is shorter than `min_chars` is dropped. Offsets are counted in
/// characters, so multi-byte text is never split mid-codepoint.
pub fn split_windows(text: &str, size: usize, overlap: usize, min_chars: usize) -> Vec<&str> {
    let step = size.saturating_sub(overlap).max(1);
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut windows = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + size).min(char_count);
        let window = &text[boundaries[start]..boundaries[end]];
        if window.trim().chars().count() >= min_chars {
            windows.push(window);
        }
        start += step;
    }
    windows
}
