//! Router configuration for the document service.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check for container orchestration
        .route("/health", get(handlers::health))
        // Document lifecycle
        .route("/documents", post(handlers::upload_document))
        .route(
            "/documents/:doc_id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        .route(
            "/documents/:doc_id/enqueue",
            post(handlers::enqueue_document),
        )
        // Result retrieval
        .route("/result/:doc_id", get(handlers::get_result))
        // Prometheus exposition
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
