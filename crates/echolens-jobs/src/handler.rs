//! Job handler contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use echolens_core::{Job, Stage, STEP_COMPLETED};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    cancel: CancellationToken,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context with its own cancellation token.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            cancel: CancellationToken::new(),
            progress_callback: None,
        }
    }

    /// Use `token` to signal cancellation to the handler.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn episode_id(&self) -> Uuid {
        self.job.episode_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the in-process token was tripped.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed; `step` is the final step label.
    Success { step: String },
    /// Job failed, optionally in a known stage.
    Failed {
        stage: Option<Stage>,
        message: String,
    },
    /// Job stopped at a stage boundary after a cancel request.
    Cancelled { cleaned_up: bool },
}

impl JobResult {
    pub fn completed() -> Self {
        JobResult::Success {
            step: STEP_COMPLETED.to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobResult::Failed {
            stage: None,
            message: message.into(),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Handler that reports progress and succeeds. Used to exercise the worker.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(50, Some("Processing..."));
        if ctx.is_cancelled() {
            return JobResult::Cancelled { cleaned_up: false };
        }
        ctx.report_progress(100, Some("Done"));
        JobResult::completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use echolens_core::{JobKind, JobStatus};
    use std::sync::{Arc, Mutex};

    fn job() -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::now_v7(),
            episode_id: Uuid::now_v7(),
            podcast_id: Uuid::now_v7(),
            kind: JobKind::Process,
            status: JobStatus::InProgress,
            current_step: None,
            progress_percent: 0,
            error_message: None,
            failed_stage: None,
            cancel_requested: false,
            cancel_cleanup: false,
            created_at: now,
            started_at: Some(now),
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_job_context_ids() {
        let job = job();
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.job_id(), job.id);
        assert_eq!(ctx.episode_id(), job.episode_id);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_shared_cancel_token() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(job()).with_cancel_token(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_noop_handler_reports_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(job()).with_progress_callback(move |percent, message| {
            sink.lock()
                .unwrap()
                .push((percent, message.map(String::from)));
        });

        let result = NoOpHandler.execute(ctx).await;
        assert_eq!(result, JobResult::completed());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (100, Some("Done".to_string())));
    }

    #[tokio::test]
    async fn test_noop_handler_honours_cancel() {
        let ctx = JobContext::new(job());
        ctx.cancel_token().cancel();
        let result = NoOpHandler.execute(ctx).await;
        assert_eq!(result, JobResult::Cancelled { cleaned_up: false });
    }
}
