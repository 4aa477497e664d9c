//! # echolens-api
//!
//! HTTP surface of the EchoLens pipeline: queue episodes for processing,
//! inspect and cancel jobs, trigger the orphan sweep, search transcripts
//! and read the notification feed.

pub mod handlers;

use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use echolens_core::{ArtifactRepository, EmbeddingBackend, JobRepository};
use echolens_jobs::{JobCanceller, OrphanSweeper};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub canceller: JobCanceller,
    pub sweeper: OrphanSweeper,
    /// Query embedding for semantic search. Search answers 503 without it.
    pub embedding: Option<Arc<dyn EmbeddingBackend>>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Episodes
        .route(
            "/api/v1/episodes/:id/process",
            post(handlers::episodes::process_episode),
        )
        .route(
            "/api/v1/episodes/:id/extract-terms",
            post(handlers::episodes::extract_terms),
        )
        .route("/api/v1/search", post(handlers::episodes::search))
        // Jobs
        .route("/api/v1/jobs", get(handlers::jobs::list_jobs))
        .route("/api/v1/jobs/sweep", post(handlers::jobs::sweep_orphans))
        .route(
            "/api/v1/jobs/clear-history",
            post(handlers::jobs::clear_history),
        )
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/v1/jobs/:id/logs", get(handlers::jobs::job_logs))
        .route("/api/v1/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .route("/api/v1/tasks", get(handlers::jobs::task_overview))
        .route("/api/v1/queue/stats", get(handlers::jobs::queue_stats))
        // Notifications
        .route(
            "/api/v1/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(handlers::notifications::mark_all_read),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(handlers::notifications::mark_read),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Internal(echolens_core::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    ServiceUnavailable(String),
}

impl From<echolens_core::Error> for ApiError {
    fn from(err: echolens_core::Error) -> Self {
        use echolens_core::Error;
        match err {
            Error::NotFound(_) | Error::EpisodeNotFound(_) | Error::JobNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                tracing::error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
