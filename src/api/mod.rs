//! HTTP surface of the enhancement service.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

pub use handlers::AppState;

/// Build the service routes over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Enhancement jobs
        .route("/enhance/jobs", post(handlers::start_enhance_job))
        .route(
            "/enhance/jobs/:job_id",
            get(handlers::get_job_status).delete(handlers::cancel_job),
        )
        // Cached chunks
        .route(
            "/chunks/:identity",
            get(handlers::get_chunks).delete(handlers::delete_chunks),
        )
        .route("/chunks/:identity/summary-groups", get(handlers::summary_groups))
        .route(
            "/chunks/:identity/summary-groups/:group/summary",
            post(handlers::summarize_group),
        )
        .route("/chunks/:identity/:index", delete(handlers::delete_chunk))
        .route(
            "/chunks/:identity/:index/reprocess",
            post(handlers::reprocess_chunk),
        )
        .with_state(state)
}
