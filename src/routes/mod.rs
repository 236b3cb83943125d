use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod audit;
pub mod caller;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

/// Health and API routes. `/metrics` is mounted by the binary, which owns
/// the Prometheus recorder.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_upload).get(jobs::list_jobs))
        .route("/api/v1/jobs/remote", post(jobs::submit_remote))
        .route("/api/v1/jobs/{id}", get(jobs::get_job))
        .route("/api/v1/jobs/{id}/original", get(jobs::get_original))
        .route("/api/v1/jobs/{id}/processed", get(jobs::get_processed))
        .route("/api/v1/audit", get(audit::list_audit))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
