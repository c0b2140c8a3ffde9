//! Worker loop: pulls jobs, runs the pipeline and inference, records
//! outcomes on the document and in metrics.
//!
//! Per job: `received -> loading-images -> inferring -> persisting-result
//! -> (completed | failed)`. A job failure is recorded and the loop keeps
//! pulling; it never takes the process down. Each poll cycle starts with a
//! recovery sweep that requeues documents stuck in `processing` past the
//! configured timeout, so redelivered jobs can claim them again after a
//! worker dies mid-job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::inference::{InferenceError, VlmClient};
use crate::metrics::JobMetrics;
use crate::pipeline::{self, PipelineError};
use crate::queue::{JobHandle, JobQueue, QueueError};
use crate::repository::{DocumentRepository, RepositoryError};
use crate::storage::FileStorage;

/// Errors that fail a single job. The worker records them and moves on.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to read stored file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("image loading task panicked")]
    LoadTaskPanicked,
}

/// Outcome of a single delivery, for tests and logging.
#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// The document was not in `queued` state - a redelivered or stale job.
    Skipped,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub stale_processing_timeout: Duration,
    pub render_dpi: u32,
}

/// Long-lived worker pulling from the shared job queue.
pub struct Worker {
    repo: Arc<DocumentRepository>,
    storage: Arc<FileStorage>,
    queue: Arc<dyn JobQueue>,
    vlm: Arc<dyn VlmClient>,
    metrics: Arc<JobMetrics>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        repo: Arc<DocumentRepository>,
        storage: Arc<FileStorage>,
        queue: Arc<dyn JobQueue>,
        vlm: Arc<dyn VlmClient>,
        metrics: Arc<JobMetrics>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            repo,
            storage,
            queue,
            vlm,
            metrics,
            config,
        }
    }

    /// Run forever, polling the queue.
    pub async fn run(&self) {
        info!(model = self.vlm.model_id(), "worker started");
        loop {
            match self.run_once().await {
                Ok(Some(_)) => {} // keep draining without sleeping
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    // Queue trouble is transient by assumption; back off.
                    warn!("queue poll failed: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// One poll cycle: sweep stale documents, then process at most one job.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        self.sweep_stale();

        let Some(handle) = self.queue.claim_next().await? else {
            return Ok(None);
        };
        Ok(Some(self.handle_delivery(handle).await))
    }

    /// Requeue documents whose `processing` claim went stale.
    fn sweep_stale(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_processing_timeout)
                .unwrap_or_default();
        match self.repo.requeue_stale_processing(cutoff) {
            Ok(ids) if !ids.is_empty() => {
                warn!(?ids, "requeued stale processing documents");
            }
            Ok(_) => {}
            Err(e) => warn!("stale-processing sweep failed: {e}"),
        }
    }

    /// Process one delivered job and resolve its claim.
    async fn handle_delivery(&self, handle: JobHandle) -> JobOutcome {
        let document_id = handle.job.document_id;

        // Status-based guard: only a `queued` document may be claimed. A
        // redelivered job for a document that is already processing or
        // terminal resolves as a no-op.
        match self.repo.begin_processing(document_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(document_id, "skipping job: document not queued");
                if let Err(e) = self.queue.complete(handle).await {
                    warn!(document_id, "failed to resolve skipped job: {e}");
                }
                return JobOutcome::Skipped;
            }
            Err(e) => {
                warn!(document_id, "could not claim document: {e}");
                if let Err(e) = self.queue.fail(handle, &e.to_string(), true).await {
                    warn!(document_id, "failed to resolve job: {e}");
                }
                return JobOutcome::Failed;
            }
        }

        self.metrics.active_jobs.inc();
        let start = Instant::now();

        let result = self.process_job(&handle).await;

        let elapsed = start.elapsed();
        self.metrics.active_jobs.dec();
        self.metrics.processing_seconds.observe(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.jobs_completed.inc();
                info!(
                    document_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "document processed"
                );
                if let Err(e) = self.queue.complete(handle).await {
                    warn!(document_id, "failed to resolve completed job: {e}");
                }
                JobOutcome::Completed
            }
            Err(e) => {
                self.metrics.jobs_failed.inc();
                // Recorded on the document, surfaced in logs; the loop
                // itself keeps running.
                error!(document_id, "processing failed: {e}");
                if let Err(e) = self.repo.mark_error(document_id) {
                    warn!(document_id, "failed to mark document error: {e}");
                }
                if let Err(e) = self.queue.fail(handle, &e.to_string(), false).await {
                    warn!(document_id, "failed to resolve failed job: {e}");
                }
                JobOutcome::Failed
            }
        }
    }

    /// Load images, run inference, persist the result.
    async fn process_job(&self, handle: &JobHandle) -> Result<(), JobError> {
        let job = &handle.job;

        let bytes = tokio::fs::read(&job.file_path).await?;

        // pdfium is CPU-bound and not async-safe; decode off the runtime.
        let filename = job.file_path.clone();
        let dpi = self.config.render_dpi;
        let frames = tokio::task::spawn_blocking(move || {
            pipeline::load_into_images(&bytes, &filename, dpi)
        })
        .await
        .map_err(|_| JobError::LoadTaskPanicked)??;

        debug!(
            document_id = job.document_id,
            frames = frames.len(),
            "running inference"
        );
        let text = self.vlm.generate(&frames, &job.prompt).await?;

        self.repo.set_result(job.document_id, &text)?;
        self.storage.write_result(job.document_id, &text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    use crate::models::DocumentStatus;
    use crate::queue::{NewJob, SqliteJobQueue};

    struct StubVlm {
        response: Result<String, String>,
        calls: AtomicUsize,
    }

    impl StubVlm {
        fn ok(payload: &str) -> Self {
            Self {
                response: Ok(payload.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(detail: &str) -> Self {
            Self {
                response: Err(detail.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VlmClient for StubVlm {
        fn model_id(&self) -> &str {
            "stub"
        }

        async fn generate(
            &self,
            _frames: &[DynamicImage],
            _prompt: &str,
        ) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(detail) => Err(InferenceError::Api {
                    status: 500,
                    detail: detail.clone(),
                }),
            }
        }
    }

    struct Fixture {
        repo: Arc<DocumentRepository>,
        storage: Arc<FileStorage>,
        queue: Arc<SqliteJobQueue>,
        metrics: Arc<JobMetrics>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        Fixture {
            repo: Arc::new(DocumentRepository::new(&db_path).unwrap()),
            storage: Arc::new(FileStorage::new(dir.path()).unwrap()),
            queue: Arc::new(
                SqliteJobQueue::new(&db_path, Duration::from_secs(60)).unwrap(),
            ),
            metrics: Arc::new(JobMetrics::new().unwrap()),
            _dir: dir,
        }
    }

    fn worker(f: &Fixture, vlm: Arc<dyn VlmClient>) -> Worker {
        Worker::new(
            f.repo.clone(),
            f.storage.clone(),
            f.queue.clone(),
            vlm,
            f.metrics.clone(),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                stale_processing_timeout: Duration::from_secs(1800),
                render_dpi: 300,
            },
        )
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Upload + enqueue a document the way the orchestrator would.
    async fn seed_job(f: &Fixture, filename: &str, bytes: &[u8], prompt: &str) -> i64 {
        let path = f.storage.save_upload(filename, bytes).unwrap();
        let doc = f.repo.create(filename).unwrap();
        f.queue
            .enqueue(NewJob {
                document_id: doc.id,
                file_path: path.display().to_string(),
                prompt: prompt.to_string(),
            })
            .await
            .unwrap();
        f.repo.mark_queued(doc.id).unwrap();
        doc.id
    }

    #[tokio::test]
    async fn successful_job_marks_done_and_materializes_result() {
        let f = fixture();
        let doc_id = seed_job(&f, "photo.png", &png_bytes(), "Extract OCR JSON").await;
        let w = worker(&f, Arc::new(StubVlm::ok("{\"text\":\"hello\"}")));

        let outcome = w.run_once().await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Completed));

        let doc = f.repo.get(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Done);
        assert_eq!(doc.result_json.as_deref(), Some("{\"text\":\"hello\"}"));

        let materialized = std::fs::read_to_string(f.storage.result_path(doc_id)).unwrap();
        assert_eq!(materialized, "{\"text\":\"hello\"}");

        assert_eq!(f.metrics.jobs_completed.get(), 1);
        assert_eq!(f.metrics.jobs_failed.get(), 0);
        assert_eq!(f.metrics.active_jobs.get(), 0);
    }

    #[tokio::test]
    async fn unsupported_format_marks_error() {
        let f = fixture();
        // BMP uploads are accepted and enqueued; the worker rejects them
        // at load time.
        let doc_id = seed_job(&f, "photo.bmp", b"BM not really", "Extract OCR JSON").await;
        let w = worker(&f, Arc::new(StubVlm::ok("unused")));

        let outcome = w.run_once().await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Failed));

        let doc = f.repo.get(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert!(doc.result_json.is_none());
        assert_eq!(f.metrics.jobs_failed.get(), 1);
        assert_eq!(f.metrics.active_jobs.get(), 0);
    }

    #[tokio::test]
    async fn inference_failure_marks_error_and_loop_continues() {
        let f = fixture();
        let first = seed_job(&f, "a.png", &png_bytes(), "p").await;
        let second = seed_job(&f, "b.png", &png_bytes(), "p").await;

        let failing = Arc::new(StubVlm::failing("CUDA out of memory"));
        let w = worker(&f, failing.clone());
        assert_eq!(w.run_once().await.unwrap(), Some(JobOutcome::Failed));
        assert_eq!(
            f.repo.get(first).unwrap().unwrap().status,
            DocumentStatus::Error
        );

        // The worker keeps pulling after a failure.
        assert_eq!(w.run_once().await.unwrap(), Some(JobOutcome::Failed));
        assert_eq!(
            f.repo.get(second).unwrap().unwrap().status,
            DocumentStatus::Error
        );
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.metrics.jobs_failed.get(), 2);
    }

    #[tokio::test]
    async fn redelivery_for_done_document_is_a_noop() {
        let f = fixture();
        let doc_id = seed_job(&f, "photo.png", &png_bytes(), "p").await;
        let vlm = Arc::new(StubVlm::ok("{}"));
        let w = worker(&f, vlm.clone());

        assert_eq!(w.run_once().await.unwrap(), Some(JobOutcome::Completed));

        // Same job delivered again (at-least-once queue).
        f.queue
            .enqueue(NewJob {
                document_id: doc_id,
                file_path: f.storage.raw_path("photo.png").display().to_string(),
                prompt: "p".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(w.run_once().await.unwrap(), Some(JobOutcome::Skipped));

        assert_eq!(vlm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.metrics.jobs_completed.get(), 1);
    }

    #[tokio::test]
    async fn idle_queue_returns_none() {
        let f = fixture();
        let w = worker(&f, Arc::new(StubVlm::ok("{}")));
        assert_eq!(w.run_once().await.unwrap(), None);
    }
}
