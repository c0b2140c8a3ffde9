//! HTTP surface: upload, enqueue, status, result retrieval, metrics.
//!
//! The server is the synchronous half of the service. It persists uploads,
//! hands jobs to the queue, and reads document state back out; all
//! inference happens in workers.

pub mod auth;
mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::FromRef;
use tracing::info;

use crate::metrics::JobMetrics;
use crate::queue::JobQueue;
use crate::repository::DocumentRepository;
use crate::storage::FileStorage;
use auth::TokenTable;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<DocumentRepository>,
    pub storage: Arc<FileStorage>,
    pub queue: Arc<dyn JobQueue>,
    pub metrics: Arc<JobMetrics>,
    pub tokens: Arc<TokenTable>,
    /// Prompt used when an enqueue request carries none.
    pub default_prompt: String,
}

impl FromRef<AppState> for Arc<TokenTable> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
