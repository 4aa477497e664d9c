//! Repository and adapter traits.
//!
//! The pipeline depends only on these traits; PostgreSQL repositories and
//! HTTP adapters are injected at startup, mocks and in-memory stores in tests.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    ArtifactCounts, Episode, Job, JobFilter, JobKind, JobLogEntry, NewNotification, NewTerm,
    NewVectorSlice, Notification, QueueStats, Result, SliceHit, Summary, TaskOverview, Term,
    Transcript, Vector,
};

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Job record store: the single source of truth for job lifecycle.
///
/// Every status-changing write is guarded so a terminal job never changes
/// again. Methods that perform a transition return `true` when a row changed.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a pending full-processing job for an episode.
    async fn create(&self, episode_id: Uuid, podcast_id: Uuid) -> Result<Job>;

    /// Create a pending job of `kind` unless the episode already has an
    /// active job of any kind.
    async fn create_deduplicated(
        &self,
        episode_id: Uuid,
        podcast_id: Uuid,
        kind: JobKind,
    ) -> Result<Option<Job>>;

    /// Claim the oldest pending job, moving it to `in_progress`.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Record the current step and percentage of an in-progress job.
    async fn update_progress(&self, job_id: Uuid, step: &str, percent: i32) -> Result<()>;

    /// Touch `updated_at` of an in-progress job without changing its step.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Mark an in-progress job successful.
    async fn complete(&self, job_id: Uuid, step: &str) -> Result<bool>;

    /// Mark an active job failed, recording the failing stage if known.
    async fn fail(&self, job_id: Uuid, stage: Option<&str>, error: &str) -> Result<bool>;

    /// Mark an active job cancelled.
    async fn mark_cancelled(&self, job_id: Uuid) -> Result<bool>;

    /// Flag an active job for cancellation. Pending jobs are cancelled at once.
    ///
    /// Returns the job after the update, or `None` if it does not exist.
    async fn request_cancel(&self, job_id: Uuid, cleanup: bool) -> Result<Option<Job>>;

    /// Whether cancellation was requested for the job.
    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Active, queued and most recent terminal jobs.
    async fn task_overview(&self) -> Result<TaskOverview>;

    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Fail every in-progress job whose last update is older than `timeout`.
    ///
    /// Pending jobs are left queued however old they are.
    ///
    /// Returns the ids of the jobs that were reclaimed.
    async fn sweep_orphans(&self, timeout: Duration) -> Result<Vec<Uuid>>;

    /// Delete all terminal jobs. Returns the number removed.
    async fn clear_history(&self) -> Result<u64>;

    async fn append_log(&self, job_id: Uuid, level: &str, message: &str) -> Result<()>;

    /// Append a log line where the caller cannot act on a failed write.
    /// The failure is reported at warn instead of returned.
    async fn record_log(&self, job_id: Uuid, level: &str, message: &str) {
        if let Err(e) = self.append_log(job_id, level, message).await {
            tracing::warn!(
                subsystem = "jobs",
                job_id = %job_id,
                level,
                error = %e,
                "Failed to append job log"
            );
        }
    }

    /// Most recent log lines for a job, oldest first.
    async fn logs(&self, job_id: Uuid, limit: i64) -> Result<Vec<JobLogEntry>>;

    async fn add_notification(&self, notification: NewNotification) -> Result<Notification>;

    /// Store a notification, reporting a failed write at warn.
    async fn record_notification(&self, notification: NewNotification) {
        let title = notification.title.clone();
        if let Err(e) = self.add_notification(notification).await {
            tracing::warn!(
                subsystem = "jobs",
                title = %title,
                error = %e,
                "Failed to store notification"
            );
        }
    }

    /// Newest notifications first.
    async fn notifications(&self, unread_only: bool, limit: i64) -> Result<Vec<Notification>>;

    /// Mark one notification read. Returns `false` if it does not exist.
    async fn mark_notification_read(&self, id: Uuid) -> Result<bool>;

    /// Mark every notification read. Returns the number changed.
    async fn mark_all_notifications_read(&self) -> Result<u64>;
}

/// Storage for episode artifacts produced by the pipeline.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn get_episode(&self, episode_id: Uuid) -> Result<Option<Episode>>;

    async fn set_local_audio_path(&self, episode_id: Uuid, path: Option<&str>) -> Result<()>;

    async fn get_transcript(&self, episode_id: Uuid) -> Result<Option<Transcript>>;

    async fn save_transcript(&self, episode_id: Uuid, text: &str) -> Result<()>;

    async fn get_summary(&self, episode_id: Uuid) -> Result<Option<Summary>>;

    async fn save_summary(&self, episode_id: Uuid, text: &str) -> Result<()>;

    async fn set_summary_audio(&self, episode_id: Uuid, audio_path: &str) -> Result<()>;

    async fn list_terms(&self, episode_id: Uuid) -> Result<Vec<Term>>;

    /// Distinct term names already stored for any episode of the podcast.
    async fn term_names_for_podcast(&self, podcast_id: Uuid) -> Result<Vec<String>>;

    /// Insert terms, skipping names (case-insensitive) the podcast already has.
    /// Returns the number inserted.
    async fn insert_terms(&self, episode: &Episode, terms: &[NewTerm]) -> Result<u64>;

    async fn count_slices(&self, episode_id: Uuid) -> Result<i64>;

    async fn insert_slices(&self, episode: &Episode, slices: &[NewVectorSlice]) -> Result<u64>;

    /// Another episode with the same audio URL that already has a transcript.
    async fn find_processed_duplicate(
        &self,
        audio_url: &str,
        exclude_episode: Uuid,
    ) -> Result<Option<Episode>>;

    /// Copy transcript, summary, terms and slices from one episode to another.
    /// Artifacts the target already has are left alone.
    async fn copy_artifacts(&self, from: &Episode, to: &Episode) -> Result<ArtifactCounts>;

    /// Delete transcript, summary, terms and slices of an episode.
    async fn delete_artifacts(&self, episode_id: Uuid) -> Result<ArtifactCounts>;

    /// Transcript slices most similar to `embedding`, optionally within a podcast.
    async fn search_slices(
        &self,
        embedding: &Vector,
        podcast_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SliceHit>>;
}

// =============================================================================
// ADAPTER TRAITS
// =============================================================================

/// Per-call options for chat completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
}

impl ChatOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }
}

/// Chat/completion capability.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete a single user prompt.
    async fn complete(&self, prompt: &str, options: &ChatOptions) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one vector per input, in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Speech-to-text capability.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one audio file (already within the provider's size limit).
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str, mime_type: &str)
        -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize speech, returning encoded audio bytes (mp3).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    fn model_name(&self) -> &str;
}
