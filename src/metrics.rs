//! Operational counters for the job lifecycle, exposed in Prometheus text
//! format at `GET /metrics`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Job lifecycle metrics. One instance per process, shared by the server
/// and worker.
pub struct JobMetrics {
    registry: Registry,
    pub jobs_created: IntCounter,
    pub jobs_completed: IntCounter,
    pub jobs_failed: IntCounter,
    pub active_jobs: IntGauge,
    pub processing_seconds: Histogram,
}

impl JobMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_created = IntCounter::with_opts(Opts::new(
            "ocr_jobs_created_total",
            "Total OCR jobs created",
        ))?;
        let jobs_completed = IntCounter::with_opts(Opts::new(
            "ocr_jobs_completed_total",
            "Total OCR jobs completed",
        ))?;
        let jobs_failed = IntCounter::with_opts(Opts::new(
            "ocr_jobs_failed_total",
            "Total OCR jobs failed",
        ))?;
        let active_jobs = IntGauge::with_opts(Opts::new(
            "ocr_active_jobs",
            "Active OCR jobs in processing",
        ))?;
        let processing_seconds = Histogram::with_opts(HistogramOpts::new(
            "ocr_processing_seconds",
            "OCR processing time in seconds",
        ))?;

        registry.register(Box::new(jobs_created.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(jobs_failed.clone()))?;
        registry.register(Box::new(active_jobs.clone()))?;
        registry.register(Box::new(processing_seconds.clone()))?;

        Ok(Self {
            registry,
            jobs_created,
            jobs_completed,
            jobs_failed,
            active_jobs,
            processing_seconds,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
