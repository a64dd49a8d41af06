//! Obtains the raw bytes of a document.
//!
//! Embedded content arrives base64-encoded. Text documents are sometimes
//! stored as plain text instead, so for non-PDF documents a value that is
//! not valid base64 is used verbatim. Otherwise the bytes are downloaded
//! from `storage_url` with a per-call timeout: a short one on the query
//! path and a longer one when indexing.

use std::time::Duration;

use base64::Engine;

use crate::error::FetchError;
use crate::models::Document;

#[derive(Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                source: e,
            })?;
        Ok(Self { client })
    }

    /// The document's bytes, waiting at most `timeout` for a download.
    pub async fn fetch(&self, doc: &Document, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        if let Some(embedded) = doc.embedded_content.as_deref().filter(|s| !s.is_empty()) {
            return decode_embedded(embedded, doc.is_pdf());
        }

        let Some(url) = doc.storage_url.as_deref().filter(|s| !s.is_empty()) else {
            return Err(FetchError::NoContent(doc.id.clone()));
        };

        tracing::debug!(document_id = %doc.id, url, "downloading document");
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }
}

/// Decode embedded content. Binary (PDF) content must be valid base64.
///
/// Text content is tried as base64 first and taken verbatim only when that
/// fails, so plain text that happens to be valid base64 is decoded.
pub fn decode_embedded(embedded: &str, binary: bool) -> Result<Vec<u8>, FetchError> {
    match base64::engine::general_purpose::STANDARD.decode(embedded.trim()) {
        Ok(bytes) => Ok(bytes),
        Err(_) if !binary => Ok(embedded.as_bytes().to_vec()),
        Err(e) => Err(FetchError::InvalidEmbedded(e)),
    }
}

/// Encode raw bytes the way documents embed them.
pub fn encode_embedded(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
