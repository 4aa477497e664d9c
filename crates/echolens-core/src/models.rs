//! Data models for the episode processing pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use pgvector::Vector;

use crate::error::Error;

// =============================================================================
// JOB
// =============================================================================

/// Lifecycle state of a processing job.
///
/// Transitions are monotonic: `Pending -> InProgress -> {Success, Failure,
/// Cancelled}`. A pending job may also go straight to `Cancelled` (cancelled
/// before a worker claimed it) or `Failure` (failed before it started).
/// Terminal states never change; resubmission creates a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Success,
        JobStatus::Failure,
        JobStatus::Cancelled,
    ];

    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (Pending, Failure)
                | (InProgress, Success)
                | (InProgress, Failure)
                | (InProgress, Cancelled)
        )
    }

    /// Statuses from which `next` may be reached. Used to guard SQL updates.
    pub fn sources_of(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" | "progress" | "running" => Ok(JobStatus::InProgress),
            "success" => Ok(JobStatus::Success),
            "failure" | "failed" => Ok(JobStatus::Failure),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CopyExisting,
    Download,
    Transcribe,
    Embed,
    ExtractTerms,
    Summarize,
    SummaryAudio,
}

impl Stage {
    /// Stages in the fixed order the orchestrator runs them.
    pub const ORDER: [Stage; 7] = [
        Stage::CopyExisting,
        Stage::Download,
        Stage::Transcribe,
        Stage::Embed,
        Stage::ExtractTerms,
        Stage::Summarize,
        Stage::SummaryAudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CopyExisting => "copy_existing",
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Embed => "embed",
            Stage::ExtractTerms => "extract_terms",
            Stage::Summarize => "summarize",
            Stage::SummaryAudio => "summary_audio",
        }
    }

    /// Human readable step label written to the job record.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::CopyExisting => "Checking for existing processing",
            Stage::Download => "Downloading audio",
            Stage::Transcribe => "Transcribing audio",
            Stage::Embed => "Creating vector embeddings",
            Stage::ExtractTerms => "Extracting terms",
            Stage::Summarize => "Generating summary",
            Stage::SummaryAudio => "Generating summary audio",
        }
    }

    /// Progress percentage recorded once the stage has finished.
    pub fn progress_after(&self) -> i32 {
        match self {
            Stage::CopyExisting => 5,
            Stage::Download => 15,
            Stage::Transcribe => 40,
            Stage::Embed => 55,
            Stage::ExtractTerms => 75,
            Stage::Summarize => 90,
            Stage::SummaryAudio => 95,
        }
    }

    /// Progress percentage recorded when the stage starts.
    pub fn progress_before(&self) -> i32 {
        let idx = Self::ORDER.iter().position(|s| s == self).unwrap_or(0);
        if idx == 0 {
            0
        } else {
            Self::ORDER[idx - 1].progress_after()
        }
    }

    /// Find the stage whose label prefixes a step message such as
    /// `"Transcribing audio: chunk 2/5"`. The longest matching label wins.
    pub fn from_step(step: &str) -> Option<Stage> {
        let lower = step.to_lowercase();
        Self::ORDER
            .iter()
            .copied()
            .filter(|s| lower.starts_with(&s.label().to_lowercase()))
            .max_by_key(|s| s.label().len())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

/// Step label written when the pipeline starts.
pub const STEP_STARTING: &str = "Starting processing";

/// Step label written on success.
pub const STEP_COMPLETED: &str = "Completed";

/// Step label written when results were copied from a duplicate episode.
pub const STEP_COMPLETED_DEDUPLICATED: &str = "Completed (deduplicated)";

/// What a job runs for its episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Every stage of [`Stage::ORDER`].
    #[default]
    Process,
    /// Term extraction over an existing transcript, adding only terms the
    /// podcast does not know yet.
    ExtractTerms,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Process => "process",
            JobKind::ExtractTerms => "extract_terms",
        }
    }

    /// Stages a job of this kind runs, in order.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            JobKind::Process => &Stage::ORDER,
            JobKind::ExtractTerms => &[Stage::ExtractTerms],
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(JobKind::Process),
            "extract_terms" => Ok(JobKind::ExtractTerms),
            other => Err(Error::InvalidInput(format!("Unknown job kind: {}", other))),
        }
    }
}

/// A processing run for one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub podcast_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub current_step: Option<String>,
    pub progress_percent: i32,
    pub error_message: Option<String>,
    pub failed_stage: Option<String>,
    pub cancel_requested: bool,
    pub cancel_cleanup: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filter for job listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub episode_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Active, queued and recent jobs for the task overview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOverview {
    pub active: Vec<Job>,
    pub queued: Vec<Job>,
    pub recent: Vec<Job>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub in_progress: i64,
    pub succeeded_last_hour: i64,
    pub failed_last_hour: i64,
    pub cancelled_last_hour: i64,
    pub total: i64,
}

/// A single log line recorded against a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: Uuid,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Severity shown with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "success",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

impl FromStr for NotificationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(NotificationLevel::Info),
            "success" => Ok(NotificationLevel::Success),
            "warning" => Ok(NotificationLevel::Warning),
            "error" => Ok(NotificationLevel::Error),
            other => Err(Error::InvalidInput(format!(
                "Unknown notification level: {}",
                other
            ))),
        }
    }
}

/// Event a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobStarted,
    JobCompleted,
    JobFailed,
    JobCancelled,
    OrphansSwept,
    HistoryCleared,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::JobStarted => "job_started",
            NotificationKind::JobCompleted => "job_completed",
            NotificationKind::JobFailed => "job_failed",
            NotificationKind::JobCancelled => "job_cancelled",
            NotificationKind::OrphansSwept => "orphans_swept",
            NotificationKind::HistoryCleared => "history_cleared",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_started" => Ok(NotificationKind::JobStarted),
            "job_completed" => Ok(NotificationKind::JobCompleted),
            "job_failed" => Ok(NotificationKind::JobFailed),
            "job_cancelled" => Ok(NotificationKind::JobCancelled),
            "orphans_swept" => Ok(NotificationKind::OrphansSwept),
            "history_cleared" => Ok(NotificationKind::HistoryCleared),
            other => Err(Error::InvalidInput(format!(
                "Unknown notification kind: {}",
                other
            ))),
        }
    }
}

/// A stored, user-facing notice about job activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub job_id: Option<Uuid>,
    pub episode_id: Option<Uuid>,
    pub podcast_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub job_id: Option<Uuid>,
    pub episode_id: Option<Uuid>,
    pub podcast_id: Option<Uuid>,
}

impl NewNotification {
    pub fn new(
        kind: NotificationKind,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            level,
            title: title.into(),
            message: message.into(),
            job_id: None,
            episode_id: None,
            podcast_id: None,
        }
    }

    /// Attach the job, episode and podcast the notice is about.
    pub fn for_job(mut self, job: &Job) -> Self {
        self.job_id = Some(job.id);
        self.episode_id = Some(job.episode_id);
        self.podcast_id = Some(job.podcast_id);
        self
    }
}

// =============================================================================
// EPISODE ARTIFACTS
// =============================================================================

/// Read model of an episode as the pipeline needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub podcast_id: Uuid,
    /// URL-safe podcast name, used for the on-disk directory layout.
    pub podcast_slug: String,
    pub title: String,
    pub audio_url: String,
    pub local_audio_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub episode_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub episode_id: Uuid,
    pub text: String,
    pub audio_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a term came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermSource {
    #[default]
    Auto,
    Manual,
}

impl TermSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermSource::Auto => "auto",
            TermSource::Manual => "manual",
        }
    }
}

impl FromStr for TermSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TermSource::Auto),
            "manual" => Ok(TermSource::Manual),
            other => Err(Error::InvalidInput(format!("Unknown term source: {}", other))),
        }
    }
}

/// A stored glossary term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub term: String,
    pub context: Option<String>,
    pub explanation: Option<String>,
    pub elaborate_explanation: Option<String>,
    pub categories: Vec<String>,
    pub source: TermSource,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

/// A term as produced by extraction, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTerm {
    pub term: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default, alias = "category", deserialize_with = "one_or_many")]
    pub categories: Vec<String>,
}

impl ExtractedTerm {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Case-insensitive merge key.
    pub fn key(&self) -> String {
        self.term.trim().to_lowercase()
    }
}

/// Accept `"category": "x"`, `"categories": ["x", "y"]` or null.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// An extracted term ready to store, with its optional embedding.
#[derive(Debug, Clone)]
pub struct NewTerm {
    pub term: ExtractedTerm,
    pub embedding: Option<Vector>,
}

/// A transcript slice with its embedding, ready to store.
#[derive(Debug, Clone)]
pub struct NewVectorSlice {
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Vector,
}

/// A stored transcript slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSlice {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub podcast_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
}

/// Semantic search hit over transcript slices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceHit {
    #[serde(flatten)]
    pub slice: VectorSlice,
    pub score: f32,
}

/// Per-table row counts touched by a copy or cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCounts {
    pub transcripts: u64,
    pub summaries: u64,
    pub terms: u64,
    pub slices: u64,
}

impl ArtifactCounts {
    pub fn total(&self) -> u64 {
        self.transcripts + self.summaries + self.terms + self.slices
    }
}
