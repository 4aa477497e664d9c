//! Episode processing and transcript search handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use echolens_core::defaults::SEARCH_LIMIT;
use echolens_core::{Error, JobKind};

use crate::{ApiError, AppState};

/// Queue an episode for processing.
///
/// # Returns
/// - 202 Accepted with the new job id
/// - 404 Not Found if the episode does not exist
/// - 409 Conflict if a pending or running job already exists for the episode
pub async fn process_episode(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let episode = state
        .artifacts
        .get_episode(id)
        .await?
        .ok_or(Error::EpisodeNotFound(id))?;

    let job = state
        .jobs
        .create_deduplicated(episode.id, episode.podcast_id, JobKind::Process)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "Episode {} already has an active processing job",
                episode.id
            ))
        })?;

    state
        .jobs
        .record_log(job.id, "info", "Queued for processing")
        .await;

    info!(
        subsystem = "api",
        job_id = %job.id,
        episode_id = %episode.id,
        "Episode queued for processing"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job_id": job.id,
            "status": job.status,
        })),
    ))
}

/// Queue a terms-only job that adds terms the podcast does not know yet.
///
/// # Returns
/// - 202 Accepted with the new job id
/// - 404 Not Found if the episode does not exist or has no transcript
/// - 409 Conflict if a pending or running job already exists for the episode
pub async fn extract_terms(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let episode = state
        .artifacts
        .get_episode(id)
        .await?
        .ok_or(Error::EpisodeNotFound(id))?;

    if state.artifacts.get_transcript(episode.id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Episode {} has no transcript yet",
            episode.id
        )));
    }

    let job = state
        .jobs
        .create_deduplicated(episode.id, episode.podcast_id, JobKind::ExtractTerms)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "Episode {} already has an active processing job",
                episode.id
            ))
        })?;

    state
        .jobs
        .record_log(job.id, "info", "Queued for term extraction")
        .await;

    info!(
        subsystem = "api",
        job_id = %job.id,
        episode_id = %episode.id,
        "Episode queued for term extraction"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job_id": job.id,
            "status": job.status,
            "kind": job.kind,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    query: String,
    podcast_id: Option<Uuid>,
    limit: Option<i64>,
}

/// Semantic search over transcript slices.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query must not be empty".to_string()));
    }

    let embedding = state.embedding.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Embedding backend not configured".to_string())
    })?;

    let vector = embedding
        .embed_texts(&[query.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Adapter("Embedding backend returned no vector".to_string()))?;

    let limit = request.limit.unwrap_or(SEARCH_LIMIT).clamp(1, 100);
    let results = state
        .artifacts
        .search_slices(&vector, request.podcast_id, limit)
        .await?;

    Ok(Json(serde_json::json!({
        "query": query,
        "results": results,
    })))
}
