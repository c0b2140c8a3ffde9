//! Command-line interface for docsight.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{ExecutionMode, Settings};
use crate::inference::{HttpVlmClient, VlmConfig};
use crate::metrics::JobMetrics;
use crate::queue::SqliteJobQueue;
use crate::repository::DocumentRepository;
use crate::server::auth::TokenTable;
use crate::server::{self, AppState};
use crate::storage::FileStorage;
use crate::worker::{Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "docsight", version, about = "Document OCR service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "0.0.0.0", env = "HOST")]
        host: String,

        /// Port to bind.
        #[arg(long, default_value_t = 8000, env = "PORT")]
        port: u16,
    },
    /// Run a worker process pulling from the job queue.
    Worker,
}

/// Shared service wiring built from settings.
struct Service {
    settings: Settings,
    repo: Arc<DocumentRepository>,
    storage: Arc<FileStorage>,
    queue: Arc<SqliteJobQueue>,
    metrics: Arc<JobMetrics>,
}

fn build_service(settings: Settings) -> anyhow::Result<Service> {
    let storage = Arc::new(FileStorage::new(&settings.storage_root)?);
    let repo = Arc::new(DocumentRepository::new(&settings.database_path)?);
    let queue = Arc::new(SqliteJobQueue::new(
        &settings.database_path,
        settings.claim_ttl,
    )?);
    let metrics = Arc::new(JobMetrics::new()?);
    Ok(Service {
        settings,
        repo,
        storage,
        queue,
        metrics,
    })
}

fn build_worker(service: &Service) -> Worker {
    let settings = &service.settings;
    let vlm = Arc::new(HttpVlmClient::new(VlmConfig {
        endpoint: settings.inference_url.clone(),
        model: settings.model_id.clone(),
        api_key: settings.inference_api_key.clone(),
        max_new_tokens: settings.max_new_tokens,
    }));
    Worker::new(
        service.repo.clone(),
        service.storage.clone(),
        service.queue.clone(),
        vlm,
        service.metrics.clone(),
        WorkerConfig {
            poll_interval: settings.poll_interval,
            stale_processing_timeout: settings.stale_processing_timeout,
            render_dpi: settings.render_dpi,
        },
    )
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Serve { host, port } => {
            let service = build_service(settings)?;
            let state = AppState {
                repo: service.repo.clone(),
                storage: service.storage.clone(),
                queue: service.queue.clone(),
                metrics: service.metrics.clone(),
                tokens: Arc::new(TokenTable::new(
                    service.settings.admin_token.clone(),
                    service.settings.user_token.clone(),
                )),
                default_prompt: service.settings.default_prompt.clone(),
            };

            // Inline mode runs the worker loop inside the server process;
            // queued mode expects separate `docsight worker` processes.
            if service.settings.execution_mode == ExecutionMode::Inline {
                info!("inline execution mode: starting embedded worker");
                let worker = build_worker(&service);
                tokio::spawn(async move { worker.run().await });
            }

            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            server::serve(state, addr).await
        }
        Command::Worker => {
            let service = build_service(settings)?;
            let worker = build_worker(&service);
            worker.run().await;
            Ok(())
        }
    }
}
