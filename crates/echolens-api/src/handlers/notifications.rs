//! Notification feed handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use echolens_core::defaults::PAGE_LIMIT;
use echolens_core::Error;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    unread: bool,
    limit: Option<i64>,
}

/// Newest notifications first, optionally unread only.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(PAGE_LIMIT).clamp(1, 500);
    let notifications = state.jobs.notifications(query.unread, limit).await?;

    Ok(Json(serde_json::json!({
        "notifications": notifications,
    })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.jobs.mark_notification_read(id).await? {
        return Err(Error::NotFound(format!("Notification {} not found", id)).into());
    }

    Ok(Json(serde_json::json!({
        "read": true,
    })))
}

pub async fn mark_all_read(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let updated = state.jobs.mark_all_notifications_read().await?;

    Ok(Json(serde_json::json!({
        "updated": updated,
    })))
}
