#![allow(dead_code)]

use std::time::Duration;

use bookshelf_retrieval::cache::ExtractionCache;
use bookshelf_retrieval::fetch::encode_embedded;
use bookshelf_retrieval::models::{Document, ExtractionState, FileType};

/// Minimal valid PDF with one page per entry of `pages`.
/// Builds body then xref with correct byte offsets so both lopdf and
/// pdf-extract can parse it.
pub fn pdf_with_pages(pages: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            pages.len()
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");

    for (i, text) in pages.iter().enumerate() {
        let page_obj = 4 + 2 * i;
        let content_obj = page_obj + 1;
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj, content_obj
            )
            .as_bytes(),
        );

        let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", text);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_obj,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

/// `count` pages of filler text; `special` puts a phrase on a 1-based page.
pub fn book_pages(count: usize, special: &[(usize, &str)]) -> Vec<String> {
    (1..=count)
        .map(|n| {
            let extra = special
                .iter()
                .find(|(page, _)| *page == n)
                .map(|(_, phrase)| format!(" {}", phrase))
                .unwrap_or_default();
            format!("Page {} discusses functions and graphs in detail{}", n, extra)
        })
        .collect()
}

pub fn pdf_document(id: &str, owner: &str, title: &str, pages: &[String]) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        owner_user_id: owner.to_string(),
        file_type: FileType::Pdf,
        embedded_content: Some(encode_embedded(&pdf_with_pages(pages))),
        storage_url: None,
        session_id: None,
        timestamp: Some("2024-09-01T08:00:00Z".to_string()),
    }
}

pub fn text_document(id: &str, owner: &str, title: &str, text: &str) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        owner_user_id: owner.to_string(),
        file_type: FileType::Text,
        embedded_content: Some(encode_embedded(text.as_bytes())),
        storage_url: None,
        session_id: None,
        timestamp: None,
    }
}

/// Poll until `id` reaches `want`, for at most a few seconds.
pub async fn wait_for_state(cache: &ExtractionCache, id: &str, want: ExtractionState) -> bool {
    for _ in 0..300 {
        if cache.state(id) == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
