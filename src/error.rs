//! Error taxonomy for the retrieval core.
//!
//! None of these reach the caller of `retrieve`: extraction and fetch
//! failures skip one document, index failures trigger the local scan, and
//! write failures are logged and counted.

use thiserror::Error;

/// The bytes could not be parsed as the declared document type at all.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("PDF could not be parsed: {0}")]
    Pdf(String),
    #[error("extraction cancelled")]
    Cancelled,
    #[error("extraction timed out after {0}s")]
    TimedOut(u64),
    #[error("extraction task failed: {0}")]
    Task(String),
}

/// The document's bytes could not be obtained.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("document {0} has neither embedded content nor a storage URL")]
    NoContent(String),
    #[error("embedded content is not valid base64: {0}")]
    InvalidEmbedded(#[from] base64::DecodeError),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Failures talking to the external full-text index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Backend down, unreachable, or timed out. Triggers the local scan.
    #[error("index unavailable: {0}")]
    Unavailable(String),
    /// An upsert or delete was rejected.
    #[error("index write failed: {0}")]
    Write(String),
    /// The backend answered with something that is not a valid response.
    #[error("unexpected index response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            IndexError::Protocol(e.to_string())
        } else {
            IndexError::Unavailable(e.to_string())
        }
    }
}

/// A background extraction job could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Every worker is busy and the queue is full.
    #[error("extraction queue is full")]
    Saturated,
    /// The pool has shut down.
    #[error("extraction pool is closed")]
    Closed,
}
