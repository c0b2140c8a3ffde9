//! Document repository: one row per uploaded artifact.
//!
//! All mutations are single-statement or single-transaction atomic, so a
//! concurrent reader never observes a half-written status/result pair.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{connect, parse_datetime, RepositoryError, Result};
use crate::models::{Document, DocumentStatus};

/// SQLite-backed document store.
pub struct DocumentRepository {
    db_path: PathBuf,
}

impl DocumentRepository {
    /// Open the repository, creating the schema if needed.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'uploaded',
                result_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            "#,
        )?;
        Ok(())
    }

    fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
        let status_raw: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Document {
            id: row.get("id")?,
            filename: row.get("filename")?,
            status: DocumentStatus::from_str(&status_raw).unwrap_or(DocumentStatus::Error),
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
            result_json: row.get("result_json")?,
        })
    }

    /// Create a document in `uploaded` state and return it.
    pub fn create(&self, filename: &str) -> Result<Document> {
        let conn = self.connect()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO documents (filename, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![
                filename,
                DocumentStatus::Uploaded.as_str(),
                now.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Document {
            id,
            filename: filename.to_string(),
            status: DocumentStatus::Uploaded,
            created_at: now,
            updated_at: now,
            result_json: None,
        })
    }

    /// Get a document by id.
    pub fn get(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?")?;
        let doc = stmt
            .query_row(params![id], Self::row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// Get a document by id, failing with `NotFound` if absent.
    pub fn get_required(&self, id: i64) -> Result<Document> {
        self.get(id)?.ok_or(RepositoryError::NotFound(id))
    }

    /// Advance the status of a document.
    ///
    /// Ordinary transitions are monotonic: moving backward (or sideways
    /// between terminal states) is rejected. Re-enqueue goes through
    /// [`mark_queued`](Self::mark_queued) instead.
    pub fn update_status(&self, id: i64, status: DocumentStatus) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM documents WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or(RepositoryError::NotFound(id))?;
        let from = DocumentStatus::from_str(&current).unwrap_or(DocumentStatus::Error);
        if !from.can_advance_to(status) {
            return Err(RepositoryError::InvalidTransition { from, to: status });
        }

        tx.execute(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Mark a document `queued`, clearing any previous result.
    ///
    /// This is the explicit enqueue/re-enqueue path: it is allowed from any
    /// state, including terminal ones, and resets the lifecycle from
    /// `queued` forward.
    pub fn mark_queued(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE documents SET status = 'queued', result_json = NULL, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    /// Claim a document for processing.
    ///
    /// Returns false if the document is not currently `queued` - another
    /// worker already holds it, or a stale job was redelivered after the
    /// document reached a terminal state. Callers treat false as a no-op.
    pub fn begin_processing(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE documents SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed == 1)
    }

    /// Store the inference result and mark the document `done` in one write.
    pub fn set_result(&self, id: i64, payload: &str) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE documents SET result_json = ?1, status = 'done', updated_at = ?2
             WHERE id = ?3",
            params![payload, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    /// Mark a document failed, clearing any partial result.
    pub fn mark_error(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE documents SET status = 'error', result_json = NULL, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    /// Delete a document row.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute("DELETE FROM documents WHERE id = ?", params![id])?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    /// Requeue documents stuck in `processing` since before `cutoff`.
    ///
    /// Recovery sweep for workers that died mid-job: the document goes back
    /// to `queued` so the redelivered job can claim it. Returns the affected
    /// ids for logging.
    pub fn requeue_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "UPDATE documents SET status = 'queued', updated_at = ?1
             WHERE status = 'processing' AND updated_at < ?2
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(
                params![Utc::now().to_rfc3339(), cutoff.to_rfc3339()],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn repo() -> (DocumentRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = DocumentRepository::new(&dir.path().join("test.db")).unwrap();
        (repo, dir)
    }

    #[test]
    fn create_and_get() {
        let (repo, _dir) = repo();
        let doc = repo.create("page.pdf").unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);

        let fetched = repo.get(doc.id).unwrap().unwrap();
        assert_eq!(fetched.filename, "page.pdf");
        assert_eq!(fetched.status, DocumentStatus::Uploaded);
        assert!(fetched.result_json.is_none());
    }

    #[test]
    fn get_unknown_is_none() {
        let (repo, _dir) = repo();
        assert!(repo.get(42).unwrap().is_none());
        assert!(matches!(
            repo.get_required(42),
            Err(RepositoryError::NotFound(42))
        ));
    }

    #[test]
    fn status_never_moves_backward() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();

        repo.mark_queued(doc.id).unwrap();
        assert!(repo.begin_processing(doc.id).unwrap());
        repo.set_result(doc.id, "{\"text\":\"hi\"}").unwrap();

        let err = repo
            .update_status(doc.id, DocumentStatus::Processing)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidTransition { .. }));

        let fetched = repo.get(doc.id).unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Done);
    }

    #[test]
    fn reenqueue_resets_state_and_result() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.mark_queued(doc.id).unwrap();
        assert!(repo.begin_processing(doc.id).unwrap());
        repo.set_result(doc.id, "{}").unwrap();

        repo.mark_queued(doc.id).unwrap();
        let fetched = repo.get(doc.id).unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Queued);
        assert!(fetched.result_json.is_none());
    }

    #[test]
    fn begin_processing_claims_once() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.mark_queued(doc.id).unwrap();

        assert!(repo.begin_processing(doc.id).unwrap());
        // A second worker sees `processing` and backs off.
        assert!(!repo.begin_processing(doc.id).unwrap());
    }

    #[test]
    fn begin_processing_noop_on_terminal() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.mark_queued(doc.id).unwrap();
        assert!(repo.begin_processing(doc.id).unwrap());
        repo.set_result(doc.id, "{}").unwrap();

        assert!(!repo.begin_processing(doc.id).unwrap());
    }

    #[test]
    fn mark_error_clears_result() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.mark_queued(doc.id).unwrap();
        repo.begin_processing(doc.id).unwrap();
        repo.mark_error(doc.id).unwrap();

        let fetched = repo.get(doc.id).unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Error);
        assert!(fetched.result_json.is_none());
    }

    #[test]
    fn delete_removes_row() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.delete(doc.id).unwrap();
        assert!(repo.get(doc.id).unwrap().is_none());
        assert!(matches!(
            repo.delete(doc.id),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn stale_processing_is_requeued() {
        let (repo, _dir) = repo();
        let doc = repo.create("a.png").unwrap();
        repo.mark_queued(doc.id).unwrap();
        repo.begin_processing(doc.id).unwrap();

        // Nothing is stale yet.
        let cutoff = Utc::now() - Duration::minutes(30);
        assert!(repo.requeue_stale_processing(cutoff).unwrap().is_empty());

        // A cutoff in the future makes the claim stale.
        let cutoff = Utc::now() + Duration::minutes(1);
        let ids = repo.requeue_stale_processing(cutoff).unwrap();
        assert_eq!(ids, vec![doc.id]);
        let fetched = repo.get(doc.id).unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Queued);
    }
}
