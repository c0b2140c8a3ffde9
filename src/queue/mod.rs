//! Durable job queue with a claim/complete/fail lifecycle.
//!
//! The queue only manages delivery; documents store their own results.
//! Delivery is at-least-once: a claim that is neither completed nor failed
//! expires after a TTL and the job is redelivered, so workers must be
//! idempotent with respect to redelivery.

mod sqlite;

pub use sqlite::SqliteJobQueue;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from queue backends. The orchestrator surfaces these to callers
/// as `QueueUnavailable`; the document stays `uploaded`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("claim is no longer held (expired or already resolved)")]
    LostClaim,
}

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub document_id: i64,
    pub file_path: String,
    pub prompt: String,
}

/// A queued unit of work referencing a document.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub document_id: i64,
    pub file_path: String,
    pub prompt: String,
    /// Delivery attempt count, including the current one.
    pub attempts: u32,
}

/// A claimed job. Must be resolved via `complete` or `fail`; an abandoned
/// claim expires after the queue TTL and the job is redelivered.
#[derive(Debug)]
pub struct JobHandle {
    pub job: Job,
    pub(crate) claim_token: String,
}

/// A durable work queue delivering jobs to workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns its id.
    async fn enqueue(&self, job: NewJob) -> Result<i64, QueueError>;

    /// Claim the next deliverable job, if any.
    ///
    /// Claiming is atomic: no two workers receive the same job while a
    /// claim is live.
    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError>;

    /// Resolve a claimed job as processed (including no-op skips).
    async fn complete(&self, handle: JobHandle) -> Result<(), QueueError>;

    /// Resolve a claimed job as failed.
    ///
    /// With `requeue` the job becomes deliverable again immediately;
    /// without it the job is parked as failed (worker-level errors are not
    /// retried automatically).
    async fn fail(&self, handle: JobHandle, error: &str, requeue: bool) -> Result<(), QueueError>;

    /// Number of jobs currently deliverable.
    async fn pending(&self) -> Result<u64, QueueError>;
}
