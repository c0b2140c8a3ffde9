//! SQLite-backed job queue.
//!
//! Jobs live in a `jobs` table in the service database. Claiming is one
//! conditional UPDATE carrying a per-claim token, so concurrent workers
//! polling the same database never receive the same job while a claim is
//! live. Claim expiry is the retry safety net for workers that die
//! mid-job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Job, JobHandle, JobQueue, NewJob, QueueError};

/// SQLite-backed durable queue.
pub struct SqliteJobQueue {
    db_path: PathBuf,
    claim_ttl: Duration,
}

impl SqliteJobQueue {
    /// Open the queue, creating its table if needed.
    pub fn new(db_path: &Path, claim_ttl: Duration) -> Result<Self, QueueError> {
        let queue = Self {
            db_path: db_path.to_path_buf(),
            claim_ttl,
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn connect(&self) -> Result<Connection, QueueError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<(), QueueError> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                prompt TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                claim_token TEXT,
                claim_expires_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<i64, QueueError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO jobs (document_id, file_path, prompt, state, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![
                job.document_id,
                job.file_path,
                job.prompt,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError> {
        let conn = self.connect()?;
        let now = Utc::now();
        let token = uuid::Uuid::new_v4().to_string();
        let expires = now + chrono::Duration::from_std(self.claim_ttl).unwrap_or_default();

        // Deliverable: never claimed, or claim expired (redelivery).
        let mut stmt = conn.prepare(
            "UPDATE jobs
             SET state = 'claimed', claim_token = ?1, claim_expires_at = ?2,
                 attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE state = 'pending'
                    OR (state = 'claimed' AND claim_expires_at < ?3)
                 ORDER BY id
                 LIMIT 1
             )
             RETURNING id, document_id, file_path, prompt, attempts",
        )?;

        let job = stmt
            .query_row(
                params![token, expires.to_rfc3339(), now.to_rfc3339()],
                |row| {
                    Ok(Job {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        file_path: row.get(2)?,
                        prompt: row.get(3)?,
                        attempts: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(job.map(|job| JobHandle {
            job,
            claim_token: token,
        }))
    }

    async fn complete(&self, handle: JobHandle) -> Result<(), QueueError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE jobs SET state = 'done', claim_token = NULL, claim_expires_at = NULL
             WHERE id = ?1 AND claim_token = ?2",
            params![handle.job.id, handle.claim_token],
        )?;
        if changed == 0 {
            return Err(QueueError::LostClaim);
        }
        Ok(())
    }

    async fn fail(&self, handle: JobHandle, error: &str, requeue: bool) -> Result<(), QueueError> {
        let conn = self.connect()?;
        let state = if requeue { "pending" } else { "failed" };
        let changed = conn.execute(
            "UPDATE jobs
             SET state = ?1, claim_token = NULL, claim_expires_at = NULL, last_error = ?2
             WHERE id = ?3 AND claim_token = ?4",
            params![state, error, handle.job.id, handle.claim_token],
        )?;
        if changed == 0 {
            return Err(QueueError::LostClaim);
        }
        Ok(())
    }

    async fn pending(&self) -> Result<u64, QueueError> {
        let conn = self.connect()?;
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE state = 'pending'
                OR (state = 'claimed' AND claim_expires_at < ?1)",
            params![Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn queue(ttl: Duration) -> (SqliteJobQueue, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let queue = SqliteJobQueue::new(&dir.path().join("test.db"), ttl).unwrap();
        (queue, dir)
    }

    fn job(document_id: i64) -> NewJob {
        NewJob {
            document_id,
            file_path: format!("/data/raw/doc-{document_id}.pdf"),
            prompt: "Extract OCR JSON".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_and_claim() {
        let (queue, _dir) = queue(Duration::from_secs(60));
        let job_id = queue.enqueue(job(1)).await.unwrap();
        assert_eq!(queue.pending().await.unwrap(), 1);

        let handle = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(handle.job.id, job_id);
        assert_eq!(handle.job.document_id, 1);
        assert_eq!(handle.job.attempts, 1);

        // A live claim is not deliverable to anyone else.
        assert!(queue.claim_next().await.unwrap().is_none());
        assert_eq!(queue.pending().await.unwrap(), 0);

        queue.complete(handle).await.unwrap();
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jobs_deliver_in_order() {
        let (queue, _dir) = queue(Duration::from_secs(60));
        queue.enqueue(job(1)).await.unwrap();
        queue.enqueue(job(2)).await.unwrap();

        let first = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(first.job.document_id, 1);
        let second = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(second.job.document_id, 2);
    }

    #[tokio::test]
    async fn expired_claim_is_redelivered() {
        let (queue, _dir) = queue(Duration::ZERO);
        queue.enqueue(job(1)).await.unwrap();

        // TTL of zero: the claim expires immediately.
        let abandoned = queue.claim_next().await.unwrap().unwrap();
        let redelivered = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(redelivered.job.id, abandoned.job.id);
        assert_eq!(redelivered.job.attempts, 2);

        // The original claim token no longer resolves the job.
        assert!(matches!(
            queue.complete(abandoned).await,
            Err(QueueError::LostClaim)
        ));
        queue.complete(redelivered).await.unwrap();
    }

    #[tokio::test]
    async fn failed_job_is_parked() {
        let (queue, _dir) = queue(Duration::from_secs(60));
        queue.enqueue(job(1)).await.unwrap();

        let handle = queue.claim_next().await.unwrap().unwrap();
        queue.fail(handle, "decode failed", false).await.unwrap();

        assert!(queue.claim_next().await.unwrap().is_none());
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_job_with_requeue_redelivers() {
        let (queue, _dir) = queue(Duration::from_secs(60));
        queue.enqueue(job(1)).await.unwrap();

        let handle = queue.claim_next().await.unwrap().unwrap();
        queue.fail(handle, "transient", true).await.unwrap();

        let again = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(again.job.attempts, 2);
    }
}
