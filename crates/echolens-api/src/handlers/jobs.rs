//! Job inspection and control handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use echolens_core::defaults::{JOB_LOG_LIMIT, PAGE_LIMIT};
use echolens_core::{
    Error, Job, JobFilter, JobKind, JobStatus, NewNotification, NotificationKind,
    NotificationLevel, Stage,
};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    status: Option<String>,
    episode_id: Option<Uuid>,
    limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()?;

    let filter = JobFilter {
        status,
        episode_id: query.episode_id,
        limit: Some(query.limit.unwrap_or(PAGE_LIMIT).clamp(1, 500)),
    };
    let jobs = state.jobs.list(&filter).await?;

    // Get stats for summary
    let stats = state.jobs.queue_stats().await?;

    Ok(Json(serde_json::json!({
        "jobs": jobs,
        "total": stats.total,
        "pending": stats.pending,
        "in_progress": stats.in_progress,
    })))
}

pub async fn task_overview(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let overview = state.jobs.task_overview().await?;
    Ok(Json(overview))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.jobs.queue_stats().await?;
    Ok(Json(stats))
}

/// Status of one pipeline stage for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatus {
    pub name: &'static str,
    pub stage: Stage,
    /// `pending`, `active`, `completed` or `failed`.
    pub status: &'static str,
    /// Sub-step text such as `chunk 2/5`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Derive per-stage statuses from a job's status, step text and progress.
///
/// Only the stages the job's kind runs are listed. A terms-only job spreads
/// its progress over the whole bar, so its single stage follows job status.
pub fn step_statuses(job: &Job) -> Vec<StepStatus> {
    let step = job.current_step.as_deref().unwrap_or_default();
    let current = Stage::from_step(step);
    let failed = job
        .failed_stage
        .as_deref()
        .and_then(|s| s.parse::<Stage>().ok());

    let full_run = job.kind == JobKind::Process;

    job.kind
        .stages()
        .iter()
        .map(|&stage| {
            let status = if job.status == JobStatus::Success
                || (full_run && job.progress_percent >= stage.progress_after())
            {
                "completed"
            } else if job.status == JobStatus::Failure && failed == Some(stage) {
                "failed"
            } else if job.status == JobStatus::InProgress
                && (current == Some(stage) || !full_run)
            {
                "active"
            } else {
                "pending"
            };

            let detail = if status == "active" {
                step_detail(step, stage)
            } else {
                None
            };

            StepStatus {
                name: stage.label(),
                stage,
                status,
                detail,
            }
        })
        .collect()
}

/// `"Transcribing audio: chunk 2/5"` gives `chunk 2/5`.
fn step_detail(step: &str, stage: Stage) -> Option<String> {
    let rest = step.get(stage.label().len()..)?;
    let rest = rest
        .trim()
        .trim_start_matches(':')
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub steps: Vec<StepStatus>,
    pub error: Option<String>,
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .jobs
        .get(id)
        .await?
        .ok_or(Error::JobNotFound(id))?;

    let error = match job.status {
        JobStatus::Failure => job.error_message.clone(),
        _ => None,
    };

    Ok(Json(JobDetail {
        steps: step_statuses(&job),
        error,
        job,
    }))
}

pub async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.jobs.get(id).await?.is_none() {
        return Err(Error::JobNotFound(id).into());
    }
    let logs = state.jobs.logs(id, JOB_LOG_LIMIT).await?;

    Ok(Json(serde_json::json!({
        "job_id": id,
        "logs": logs,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    #[serde(default)]
    cleanup: bool,
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.canceller.cancel(id, query.cleanup).await?;

    info!(
        subsystem = "api",
        job_id = %id,
        cleanup = query.cleanup,
        cleanup_performed = outcome.cleanup_performed,
        "Job cancel requested"
    );

    Ok(Json(serde_json::json!({
        "status": "cancelled",
        "job_status": outcome.job.status,
        "cleanup_performed": outcome.cleanup_performed,
        "cleanup_pending": outcome.cleanup_pending,
        "removed": outcome.report,
    })))
}

pub async fn sweep_orphans(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let swept = state.sweeper.sweep_once().await?;

    Ok(Json(serde_json::json!({
        "cleaned": swept.len(),
        "job_ids": swept,
    })))
}

pub async fn clear_history(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.jobs.clear_history().await?;
    info!(subsystem = "api", deleted, "Job history cleared");

    if deleted > 0 {
        state
            .jobs
            .record_notification(NewNotification::new(
                NotificationKind::HistoryCleared,
                NotificationLevel::Info,
                "Job History Cleared",
                format!("Cleared {} completed job(s) from history", deleted),
            ))
            .await;
    }

    Ok(Json(serde_json::json!({
        "deleted_count": deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(status: JobStatus, step: Option<&str>, percent: i32) -> Job {
        Job {
            id: Uuid::now_v7(),
            episode_id: Uuid::now_v7(),
            podcast_id: Uuid::now_v7(),
            kind: JobKind::Process,
            status,
            current_step: step.map(String::from),
            progress_percent: percent,
            error_message: None,
            failed_stage: None,
            cancel_requested: false,
            cancel_cleanup: false,
            created_at: Utc::now(),
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn statuses(job: &Job) -> Vec<&'static str> {
        step_statuses(job).into_iter().map(|s| s.status).collect()
    }

    #[test]
    fn test_steps_for_running_job() {
        let steps = step_statuses(&job(
            JobStatus::InProgress,
            Some("Transcribing audio: chunk 2/5"),
            25,
        ));

        assert_eq!(steps[0].status, "completed");
        assert_eq!(steps[1].status, "completed");
        assert_eq!(steps[2].status, "active");
        assert_eq!(steps[2].detail.as_deref(), Some("chunk 2/5"));
        assert!(steps[3..].iter().all(|s| s.status == "pending"));
    }

    #[test]
    fn test_steps_detail_in_parentheses() {
        let steps = step_statuses(&job(
            JobStatus::InProgress,
            Some("Extracting terms (chunk 1/3)"),
            55,
        ));
        assert_eq!(steps[4].status, "active");
        assert_eq!(steps[4].detail.as_deref(), Some("chunk 1/3"));
    }

    #[test]
    fn test_steps_for_finished_jobs() {
        let done = job(JobStatus::Success, Some("Completed"), 100);
        assert!(statuses(&done).iter().all(|s| *s == "completed"));

        let queued = job(JobStatus::Pending, None, 0);
        assert!(statuses(&queued).iter().all(|s| *s == "pending"));
    }

    #[test]
    fn test_steps_mark_failed_stage() {
        let mut failed = job(JobStatus::Failure, Some("Generating summary"), 75);
        failed.failed_stage = Some("summarize".to_string());

        assert_eq!(
            statuses(&failed),
            vec![
                "completed",
                "completed",
                "completed",
                "completed",
                "completed",
                "failed",
                "pending"
            ]
        );
    }

    #[test]
    fn test_terms_only_job_lists_single_stage() {
        let mut terms = job(JobStatus::InProgress, Some("Extracting terms (chunk 2/4)"), 40);
        terms.kind = JobKind::ExtractTerms;

        let steps = step_statuses(&terms);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].stage, Stage::ExtractTerms);
        assert_eq!(steps[0].status, "active");
        assert_eq!(steps[0].detail.as_deref(), Some("chunk 2/4"));

        terms.status = JobStatus::Success;
        assert_eq!(statuses(&terms), vec!["completed"]);
    }

    #[test]
    fn test_step_detail_without_suffix() {
        assert_eq!(step_detail("Downloading audio", Stage::Download), None);
    }
}
