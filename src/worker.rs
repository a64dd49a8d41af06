//! Bounded pool of background extraction workers.
//!
//! A fixed number of tokio tasks pull [`ExtractionJob`]s from one bounded
//! queue. Each job reads the rest of a document from `resume_from` to the
//! last page on the blocking thread pool, then appends the text to the
//! [`ExtractionCache`] (or marks the document `Failed`).
//!
//! [`ExtractionPool::submit`] never waits: when the queue is full it
//! returns [`SubmitError::Saturated`] and the caller decides what to do.
//! Callers are expected to have won [`ExtractionCache::mark_running`]
//! before submitting, which is what keeps a document to one worker.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::cache::ExtractionCache;
use crate::error::SubmitError;
use crate::extract::{extract_text, PageWindow};
use crate::models::FileType;

/// Work order for the remainder of one document.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub document_id: String,
    pub bytes: Arc<Vec<u8>>,
    pub file_type: FileType,
    pub resume_from: usize,
}

pub struct ExtractionPool {
    sender: mpsc::Sender<ExtractionJob>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ExtractionJob>>>,
    cache: Arc<ExtractionCache>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtractionPool {
    /// A pool with a queue of `queue_depth` jobs and no workers yet.
    pub fn new(cache: Arc<ExtractionCache>, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            cache,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Create the pool and start `workers` tasks. Must be called inside a
    /// tokio runtime.
    pub fn start(cache: Arc<ExtractionCache>, workers: usize, queue_depth: usize) -> Self {
        let pool = Self::new(cache, queue_depth);
        pool.start_workers(workers);
        pool
    }

    /// Add `count` workers draining the shared queue.
    pub fn start_workers(&self, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..count {
            let worker_id = workers.len();
            let receiver = self.receiver.clone();
            let cache = self.cache.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else { break };
                    run_job(&cache, job, worker_id).await;
                }
                tracing::debug!(worker_id, "extraction worker stopped");
            }));
        }
    }

    /// Queue a job without waiting.
    pub fn submit(&self, job: ExtractionJob) -> Result<(), SubmitError> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Saturated,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

impl Drop for ExtractionPool {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.lock() {
            for handle in workers.iter() {
                handle.abort();
            }
        }
    }
}

async fn run_job(cache: &ExtractionCache, job: ExtractionJob, worker_id: usize) {
    let ExtractionJob {
        document_id,
        bytes,
        file_type,
        resume_from,
    } = job;
    tracing::debug!(worker_id, document_id = %document_id, resume_from, "background extraction started");

    let result = tokio::task::spawn_blocking(move || {
        extract_text(&bytes, file_type, PageWindow::resume_from(resume_from))
    })
    .await;

    match result {
        Ok(Ok(extraction)) => {
            cache.append_background(&document_id, &extraction.text);
            tracing::info!(
                document_id = %document_id,
                total_pages = extraction.total_pages,
                "background extraction completed"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(document_id = %document_id, error = %e, "background extraction failed");
            cache.mark_failed(&document_id);
        }
        Err(e) => {
            tracing::error!(document_id = %document_id, error = %e, "background extraction task panicked");
            cache.mark_failed(&document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionState;
    use std::time::Duration;

    fn job(id: &str, bytes: &[u8], file_type: FileType) -> ExtractionJob {
        ExtractionJob {
            document_id: id.to_string(),
            bytes: Arc::new(bytes.to_vec()),
            file_type,
            resume_from: 1,
        }
    }

    async fn wait_for_terminal(cache: &ExtractionCache, id: &str) -> ExtractionState {
        for _ in 0..200 {
            let state = cache.state(id);
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cache.state(id)
    }

    #[tokio::test]
    async fn full_queue_is_saturated() {
        let cache = Arc::new(ExtractionCache::unbounded());
        let pool = ExtractionPool::new(cache, 2);
        assert_eq!(pool.worker_count(), 0);
        assert!(pool.submit(job("a", b"a", FileType::Text)).is_ok());
        assert!(pool.submit(job("b", b"b", FileType::Text)).is_ok());
        assert_eq!(pool.queued(), 2);
        assert_eq!(
            pool.submit(job("c", b"c", FileType::Text)),
            Err(SubmitError::Saturated)
        );
    }

    #[tokio::test]
    async fn worker_appends_and_completes() {
        let cache = Arc::new(ExtractionCache::unbounded());
        cache.set_partial("d", "head".to_string(), Some(1));
        assert!(cache.mark_running("d"));

        let pool = ExtractionPool::start(cache.clone(), 1, 4);
        pool.submit(job("d", b"tail", FileType::Text)).unwrap();

        assert_eq!(wait_for_terminal(&cache, "d").await, ExtractionState::Completed);
        assert_eq!(cache.lookup("d").text.as_str(), "head\ntail");
    }

    #[tokio::test]
    async fn unreadable_bytes_mark_failed() {
        let cache = Arc::new(ExtractionCache::unbounded());
        cache.set_partial("d", "head".to_string(), Some(1));
        assert!(cache.mark_running("d"));

        let pool = ExtractionPool::start(cache.clone(), 1, 4);
        pool.submit(job("d", b"not a pdf", FileType::Pdf)).unwrap();

        assert_eq!(wait_for_terminal(&cache, "d").await, ExtractionState::Failed);
        assert_eq!(cache.lookup("d").text.as_str(), "head");
    }

    #[tokio::test]
    async fn late_workers_drain_queued_jobs() {
        let cache = Arc::new(ExtractionCache::unbounded());
        cache.set_partial("d", "head".to_string(), Some(1));
        assert!(cache.mark_running("d"));

        let pool = ExtractionPool::new(cache.clone(), 4);
        pool.submit(job("d", b"tail", FileType::Text)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.state("d"), ExtractionState::BackgroundRunning);

        pool.start_workers(1);
        assert_eq!(wait_for_terminal(&cache, "d").await, ExtractionState::Completed);
        assert_eq!(pool.queued(), 0);
    }
}
