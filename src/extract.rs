//! Text extraction from raw document bytes.
//!
//! PDFs are read page by page so callers can extract a bounded slice
//! (`PageWindow`) and resume later from where they stopped. Text and other
//! documents are decoded whole; paging does not apply to them.
//!
//! A page that fails to extract contributes empty text. Only a byte stream
//! that cannot be opened as a PDF at all is an error.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ExtractionError;
use crate::models::FileType;

/// A half-open range of 0-based page indices to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    /// `None` reads to the last page.
    pub max_pages: Option<usize>,
}

impl PageWindow {
    pub fn all() -> Self {
        Self {
            offset: 0,
            max_pages: None,
        }
    }

    pub fn first(max_pages: usize) -> Self {
        Self {
            offset: 0,
            max_pages: Some(max_pages),
        }
    }

    pub fn resume_from(offset: usize) -> Self {
        Self {
            offset,
            max_pages: None,
        }
    }

    fn end(&self, total_pages: usize) -> usize {
        match self.max_pages {
            Some(n) => self.offset.saturating_add(n).min(total_pages),
            None => total_pages,
        }
    }
}

/// Result of one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Page count of the document; `None` for unpaged types.
    pub total_pages: Option<usize>,
    /// First page not covered by this call, if any remain.
    pub next_page: Option<usize>,
}

/// A fully extracted document, kept per page when the type has pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentText {
    Paged(Vec<String>),
    Whole(String),
}

/// Extract the text inside `window`.
pub fn extract_text(
    bytes: &[u8],
    file_type: FileType,
    window: PageWindow,
) -> Result<Extraction, ExtractionError> {
    extract_text_cancellable(bytes, file_type, window, &AtomicBool::new(false))
}

/// Like [`extract_text`], but stops between pages once `cancel` is raised.
pub fn extract_text_cancellable(
    bytes: &[u8],
    file_type: FileType,
    window: PageWindow,
    cancel: &AtomicBool,
) -> Result<Extraction, ExtractionError> {
    match file_type {
        FileType::Pdf => extract_pdf_window(bytes, window, cancel),
        FileType::Text | FileType::Toc | FileType::Other => Ok(Extraction {
            text: decode_text(bytes),
            total_pages: None,
            next_page: None,
        }),
    }
}

/// Extract every page of a document, for chunking.
///
/// pdf-extract handles font encodings better than lopdf, so it is tried
/// first; lopdf's per-page reader is the fallback for files it rejects.
pub fn extract_document(bytes: &[u8], file_type: FileType) -> Result<DocumentText, ExtractionError> {
    match file_type {
        FileType::Pdf => match pdf_extract::extract_text_from_mem_by_pages(bytes) {
            Ok(pages) => Ok(DocumentText::Paged(pages)),
            Err(e) => {
                tracing::debug!(error = %e, "pdf-extract failed, reading pages with lopdf");
                let doc = load_pdf(bytes)?;
                let pages = doc
                    .get_pages()
                    .keys()
                    .map(|&n| doc.extract_text(&[n]).unwrap_or_default())
                    .collect();
                Ok(DocumentText::Paged(pages))
            }
        },
        FileType::Text | FileType::Toc | FileType::Other => {
            Ok(DocumentText::Whole(decode_text(bytes)))
        }
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1 so decoding never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn load_pdf(bytes: &[u8]) -> Result<lopdf::Document, ExtractionError> {
    lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))
}

fn extract_pdf_window(
    bytes: &[u8],
    window: PageWindow,
    cancel: &AtomicBool,
) -> Result<Extraction, ExtractionError> {
    let doc = load_pdf(bytes)?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let total_pages = page_numbers.len();
    let end = window.end(total_pages);

    let mut text = String::new();
    for &page in page_numbers.iter().take(end).skip(window.offset) {
        if cancel.load(Ordering::Relaxed) {
            return Err(ExtractionError::Cancelled);
        }
        match doc.extract_text(&[page]) {
            Ok(page_text) if !page_text.is_empty() => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(page, error = %e, "page extraction failed, skipping"),
        }
    }

    Ok(Extraction {
        text,
        total_pages: Some(total_pages),
        next_page: (end < total_pages).then_some(end),
    })
}
