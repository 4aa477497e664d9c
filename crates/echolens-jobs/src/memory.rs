//! In-memory repositories.
//!
//! Same transition rules as the PostgreSQL repositories, held in a mutex.
//! Used to run the pipeline and worker without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use echolens_core::defaults::{ORPHAN_ERROR_MESSAGE, PAGE_LIMIT, RECENT_JOB_LIMIT};
use echolens_core::{
    ArtifactCounts, ArtifactRepository, Episode, Error, Job, JobFilter, JobKind, JobLogEntry,
    JobRepository, JobStatus, NewNotification, NewTerm, NewVectorSlice, Notification,
    QueueStats, Result, SliceHit, Summary, TaskOverview, Term, TermSource, Transcript, Vector,
    VectorSlice,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// JOBS
// =============================================================================

#[derive(Default)]
struct JobState {
    jobs: HashMap<Uuid, Job>,
    logs: Vec<JobLogEntry>,
    notifications: Vec<Notification>,
}

/// Job store kept in process memory.
#[derive(Clone, Default)]
pub struct InMemoryJobRepository {
    state: Arc<Mutex<JobState>>,
    notify: Arc<Notify>,
    failing_logs: Arc<AtomicBool>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Make every `append_log` call fail until reset.
    pub fn set_log_writes_failing(&self, failing: bool) {
        self.failing_logs.store(failing, Ordering::SeqCst);
    }

    /// Overwrite a stored job, e.g. to backdate `updated_at` in tests.
    pub fn put(&self, job: Job) {
        lock(&self.state).jobs.insert(job.id, job);
    }

    fn new_job(episode_id: Uuid, podcast_id: Uuid, kind: JobKind) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::now_v7(),
            episode_id,
            podcast_id,
            kind,
            status: JobStatus::Pending,
            current_step: None,
            progress_percent: 0,
            error_message: None,
            failed_stage: None,
            cancel_requested: false,
            cancel_cleanup: false,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply `update` if the job may move to `next`. Returns whether it did.
    fn transition(&self, job_id: Uuid, next: JobStatus, update: impl FnOnce(&mut Job)) -> bool {
        let mut state = lock(&self.state);
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status.can_transition_to(next) => {
                let now = Utc::now();
                job.status = next;
                job.updated_at = now;
                if next.is_terminal() {
                    job.completed_at = Some(now);
                }
                update(job);
                true
            }
            _ => false,
        }
    }

    fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, episode_id: Uuid, podcast_id: Uuid) -> Result<Job> {
        let job = Self::new_job(episode_id, podcast_id, JobKind::Process);
        lock(&self.state).jobs.insert(job.id, job.clone());
        self.notify.notify_one();
        Ok(job)
    }

    async fn create_deduplicated(
        &self,
        episode_id: Uuid,
        podcast_id: Uuid,
        kind: JobKind,
    ) -> Result<Option<Job>> {
        let job = {
            let mut state = lock(&self.state);
            if state
                .jobs
                .values()
                .any(|j| j.episode_id == episode_id && j.status.is_active())
            {
                return Ok(None);
            }
            let job = Self::new_job(episode_id, podcast_id, kind);
            state.jobs.insert(job.id, job.clone());
            job
        };
        self.notify.notify_one();
        Ok(Some(job))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let mut state = lock(&self.state);
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            state.jobs.get_mut(&id).map(|job| {
                let now = Utc::now();
                job.status = JobStatus::InProgress;
                job.started_at = Some(now);
                job.updated_at = now;
                job.progress_percent = 0;
                job.clone()
            })
        }))
    }

    async fn update_progress(&self, job_id: Uuid, step: &str, percent: i32) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.status == JobStatus::InProgress {
                job.current_step = Some(step.to_string());
                job.progress_percent = percent.clamp(0, 100);
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.status == JobStatus::InProgress {
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, step: &str) -> Result<bool> {
        Ok(self.transition(job_id, JobStatus::Success, |job| {
            job.current_step = Some(step.to_string());
            job.progress_percent = 100;
            job.error_message = None;
        }))
    }

    async fn fail(&self, job_id: Uuid, stage: Option<&str>, error: &str) -> Result<bool> {
        Ok(self.transition(job_id, JobStatus::Failure, |job| {
            job.failed_stage = stage.map(String::from);
            job.error_message = Some(error.to_string());
        }))
    }

    async fn mark_cancelled(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.transition(job_id, JobStatus::Cancelled, |job| {
            job.cancel_requested = true;
        }))
    }

    async fn request_cancel(&self, job_id: Uuid, cleanup: bool) -> Result<Option<Job>> {
        let mut state = lock(&self.state);
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(now);
        }
        if matches!(job.status, JobStatus::InProgress | JobStatus::Cancelled) {
            job.cancel_requested = true;
            job.cancel_cleanup = cleanup;
            job.updated_at = now;
        }
        Ok(Some(job.clone()))
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        Ok(lock(&self.state)
            .jobs
            .get(&job_id)
            .map(|j| j.cancel_requested)
            .unwrap_or(false))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(lock(&self.state).jobs.get(&job_id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = lock(&self.state)
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.episode_id.map_or(true, |e| j.episode_id == e))
            .cloned()
            .collect();

        let limit = filter.limit.unwrap_or(PAGE_LIMIT).max(0) as usize;
        Ok(Self::sorted(jobs).into_iter().take(limit).collect())
    }

    async fn task_overview(&self) -> Result<TaskOverview> {
        let jobs: Vec<Job> = lock(&self.state).jobs.values().cloned().collect();

        let active = Self::sorted(
            jobs.iter()
                .filter(|j| j.status == JobStatus::InProgress)
                .cloned()
                .collect(),
        );
        let mut queued: Vec<Job> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        queued.sort_by_key(|j| j.created_at);

        let mut recent: Vec<Job> = jobs.into_iter().filter(|j| j.status.is_terminal()).collect();
        recent.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        recent.truncate(RECENT_JOB_LIMIT as usize);

        Ok(TaskOverview {
            active,
            queued,
            recent,
        })
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let state = lock(&self.state);
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let recent = |status: JobStatus| {
            state
                .jobs
                .values()
                .filter(|j| j.status == status && j.completed_at.map_or(false, |t| t > hour_ago))
                .count() as i64
        };
        let count = |status: JobStatus| {
            state.jobs.values().filter(|j| j.status == status).count() as i64
        };

        Ok(QueueStats {
            pending: count(JobStatus::Pending),
            in_progress: count(JobStatus::InProgress),
            succeeded_last_hour: recent(JobStatus::Success),
            failed_last_hour: recent(JobStatus::Failure),
            cancelled_last_hour: recent(JobStatus::Cancelled),
            total: state.jobs.len() as i64,
        })
    }

    async fn sweep_orphans(&self, timeout: Duration) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| Error::InvalidInput(format!("Invalid sweep timeout: {}", e)))?;

        let stale: Vec<Uuid> = lock(&self.state)
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress && j.updated_at < cutoff)
            .map(|j| j.id)
            .collect();

        Ok(stale
            .into_iter()
            .filter(|id| {
                self.transition(*id, JobStatus::Failure, |job| {
                    job.error_message = Some(ORPHAN_ERROR_MESSAGE.to_string());
                })
            })
            .collect())
    }

    async fn clear_history(&self) -> Result<u64> {
        let mut state = lock(&self.state);
        let before = state.jobs.len();
        state.jobs.retain(|_, j| !j.status.is_terminal());
        Ok((before - state.jobs.len()) as u64)
    }

    async fn append_log(&self, job_id: Uuid, level: &str, message: &str) -> Result<()> {
        if self.failing_logs.load(Ordering::SeqCst) {
            return Err(Error::Internal("Job log store unavailable".to_string()));
        }
        lock(&self.state).logs.push(JobLogEntry {
            job_id,
            level: level.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn logs(&self, job_id: Uuid, limit: i64) -> Result<Vec<JobLogEntry>> {
        let state = lock(&self.state);
        let lines: Vec<JobLogEntry> = state
            .logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect();
        let skip = lines.len().saturating_sub(limit.max(0) as usize);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn add_notification(&self, notification: NewNotification) -> Result<Notification> {
        let stored = Notification {
            id: Uuid::now_v7(),
            kind: notification.kind,
            level: notification.level,
            title: notification.title,
            message: notification.message,
            job_id: notification.job_id,
            episode_id: notification.episode_id,
            podcast_id: notification.podcast_id,
            read: false,
            created_at: Utc::now(),
        };
        lock(&self.state).notifications.push(stored.clone());
        Ok(stored)
    }

    async fn notifications(&self, unread_only: bool, limit: i64) -> Result<Vec<Notification>> {
        Ok(lock(&self.state)
            .notifications
            .iter()
            .rev()
            .filter(|n| !unread_only || !n.read)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<bool> {
        let mut state = lock(&self.state);
        match state.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        let mut state = lock(&self.state);
        let mut changed = 0;
        for notification in state.notifications.iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }
        Ok(changed)
    }
}

// =============================================================================
// ARTIFACTS
// =============================================================================

#[derive(Default)]
struct ArtifactState {
    episodes: HashMap<Uuid, Episode>,
    transcripts: HashMap<Uuid, Transcript>,
    summaries: HashMap<Uuid, Summary>,
    terms: Vec<(Term, Option<Vector>)>,
    slices: Vec<(VectorSlice, Vector)>,
}

/// Artifact store kept in process memory.
#[derive(Clone, Default)]
pub struct InMemoryArtifactRepository {
    state: Arc<Mutex<ArtifactState>>,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_episode(&self, episode: Episode) {
        lock(&self.state).episodes.insert(episode.id, episode);
    }

    /// Total stored artifacts of an episode.
    pub fn counts(&self, episode_id: Uuid) -> ArtifactCounts {
        let state = lock(&self.state);
        ArtifactCounts {
            transcripts: state.transcripts.contains_key(&episode_id) as u64,
            summaries: state.summaries.contains_key(&episode_id) as u64,
            terms: state
                .terms
                .iter()
                .filter(|(t, _)| t.episode_id == episode_id)
                .count() as u64,
            slices: state
                .slices
                .iter()
                .filter(|(s, _)| s.episode_id == episode_id)
                .count() as u64,
        }
    }

    fn term_row(episode_id: Uuid, new_term: &NewTerm) -> (Term, Option<Vector>) {
        let term = &new_term.term;
        (
            Term {
                id: Uuid::now_v7(),
                episode_id,
                term: term.term.trim().to_string(),
                context: term.context.clone(),
                explanation: term.explanation.clone(),
                elaborate_explanation: None,
                categories: term.categories.clone(),
                source: TermSource::Auto,
                hidden: false,
                created_at: Utc::now(),
            },
            new_term.embedding.clone(),
        )
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn get_episode(&self, episode_id: Uuid) -> Result<Option<Episode>> {
        Ok(lock(&self.state).episodes.get(&episode_id).cloned())
    }

    async fn set_local_audio_path(&self, episode_id: Uuid, path: Option<&str>) -> Result<()> {
        let mut state = lock(&self.state);
        let episode = state
            .episodes
            .get_mut(&episode_id)
            .ok_or(Error::EpisodeNotFound(episode_id))?;
        episode.local_audio_path = path.map(String::from);
        Ok(())
    }

    async fn get_transcript(&self, episode_id: Uuid) -> Result<Option<Transcript>> {
        Ok(lock(&self.state).transcripts.get(&episode_id).cloned())
    }

    async fn save_transcript(&self, episode_id: Uuid, text: &str) -> Result<()> {
        lock(&self.state)
            .transcripts
            .entry(episode_id)
            .or_insert_with(|| Transcript {
                episode_id,
                text: text.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn get_summary(&self, episode_id: Uuid) -> Result<Option<Summary>> {
        Ok(lock(&self.state).summaries.get(&episode_id).cloned())
    }

    async fn save_summary(&self, episode_id: Uuid, text: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let summary = state.summaries.entry(episode_id).or_insert_with(|| Summary {
            episode_id,
            text: String::new(),
            audio_path: None,
            created_at: Utc::now(),
        });
        summary.text = text.to_string();
        Ok(())
    }

    async fn set_summary_audio(&self, episode_id: Uuid, audio_path: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let summary = state
            .summaries
            .get_mut(&episode_id)
            .ok_or_else(|| Error::NotFound(format!("Summary for episode {}", episode_id)))?;
        summary.audio_path = Some(audio_path.to_string());
        Ok(())
    }

    async fn list_terms(&self, episode_id: Uuid) -> Result<Vec<Term>> {
        Ok(lock(&self.state)
            .terms
            .iter()
            .filter(|(t, _)| t.episode_id == episode_id)
            .map(|(t, _)| t.clone())
            .collect())
    }

    async fn term_names_for_podcast(&self, podcast_id: Uuid) -> Result<Vec<String>> {
        let state = lock(&self.state);
        let mut names: Vec<String> = state
            .terms
            .iter()
            .filter(|(t, _)| {
                state
                    .episodes
                    .get(&t.episode_id)
                    .map_or(false, |e| e.podcast_id == podcast_id)
            })
            .map(|(t, _)| t.term.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn insert_terms(&self, episode: &Episode, terms: &[NewTerm]) -> Result<u64> {
        let mut state = lock(&self.state);
        let mut inserted = 0;

        for new_term in terms {
            let key = new_term.term.key();
            let exists = state.terms.iter().any(|(t, _)| {
                t.term.to_lowercase() == key
                    && state
                        .episodes
                        .get(&t.episode_id)
                        .map_or(t.episode_id == episode.id, |e| {
                            e.podcast_id == episode.podcast_id
                        })
            });
            if !exists {
                state.terms.push(Self::term_row(episode.id, new_term));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_slices(&self, episode_id: Uuid) -> Result<i64> {
        Ok(lock(&self.state)
            .slices
            .iter()
            .filter(|(s, _)| s.episode_id == episode_id)
            .count() as i64)
    }

    async fn insert_slices(&self, episode: &Episode, slices: &[NewVectorSlice]) -> Result<u64> {
        let mut state = lock(&self.state);
        for slice in slices {
            state.slices.push((
                VectorSlice {
                    id: Uuid::now_v7(),
                    episode_id: episode.id,
                    podcast_id: episode.podcast_id,
                    chunk_index: slice.chunk_index,
                    text: slice.text.clone(),
                },
                slice.embedding.clone(),
            ));
        }
        Ok(slices.len() as u64)
    }

    async fn find_processed_duplicate(
        &self,
        audio_url: &str,
        exclude_episode: Uuid,
    ) -> Result<Option<Episode>> {
        let state = lock(&self.state);
        Ok(state
            .episodes
            .values()
            .filter(|e| e.audio_url == audio_url && e.id != exclude_episode)
            .filter_map(|e| state.transcripts.get(&e.id).map(|t| (t.created_at, e)))
            .min_by_key(|(created, _)| *created)
            .map(|(_, e)| e.clone()))
    }

    async fn copy_artifacts(&self, from: &Episode, to: &Episode) -> Result<ArtifactCounts> {
        let mut state = lock(&self.state);
        let mut counts = ArtifactCounts::default();

        if !state.transcripts.contains_key(&to.id) {
            if let Some(t) = state.transcripts.get(&from.id).cloned() {
                state.transcripts.insert(
                    to.id,
                    Transcript {
                        episode_id: to.id,
                        created_at: Utc::now(),
                        ..t
                    },
                );
                counts.transcripts = 1;
            }
        }
        if !state.summaries.contains_key(&to.id) {
            if let Some(s) = state.summaries.get(&from.id).cloned() {
                state.summaries.insert(
                    to.id,
                    Summary {
                        episode_id: to.id,
                        created_at: Utc::now(),
                        ..s
                    },
                );
                counts.summaries = 1;
            }
        }
        if !state.terms.iter().any(|(t, _)| t.episode_id == to.id) {
            let copies: Vec<_> = state
                .terms
                .iter()
                .filter(|(t, _)| t.episode_id == from.id)
                .map(|(t, e)| {
                    (
                        Term {
                            id: Uuid::now_v7(),
                            episode_id: to.id,
                            ..t.clone()
                        },
                        e.clone(),
                    )
                })
                .collect();
            counts.terms = copies.len() as u64;
            state.terms.extend(copies);
        }
        if !state.slices.iter().any(|(s, _)| s.episode_id == to.id) {
            let copies: Vec<_> = state
                .slices
                .iter()
                .filter(|(s, _)| s.episode_id == from.id)
                .map(|(s, e)| {
                    (
                        VectorSlice {
                            id: Uuid::now_v7(),
                            episode_id: to.id,
                            podcast_id: to.podcast_id,
                            ..s.clone()
                        },
                        e.clone(),
                    )
                })
                .collect();
            counts.slices = copies.len() as u64;
            state.slices.extend(copies);
        }

        Ok(counts)
    }

    async fn delete_artifacts(&self, episode_id: Uuid) -> Result<ArtifactCounts> {
        let counts = self.counts(episode_id);
        let mut state = lock(&self.state);
        state.transcripts.remove(&episode_id);
        state.summaries.remove(&episode_id);
        state.terms.retain(|(t, _)| t.episode_id != episode_id);
        state.slices.retain(|(s, _)| s.episode_id != episode_id);
        Ok(counts)
    }

    async fn search_slices(
        &self,
        embedding: &Vector,
        podcast_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SliceHit>> {
        let state = lock(&self.state);
        let mut hits: Vec<SliceHit> = state
            .slices
            .iter()
            .filter(|(s, _)| podcast_id.map_or(true, |p| s.podcast_id == p))
            .map(|(s, e)| SliceHit {
                slice: s.clone(),
                score: cosine(embedding.as_slice(), e.as_slice()),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(url: &str) -> Episode {
        Episode {
            id: Uuid::now_v7(),
            podcast_id: Uuid::nil(),
            podcast_slug: "show".to_string(),
            title: "Episode".to_string(),
            audio_url: url.to_string(),
            local_audio_path: None,
        }
    }

    #[tokio::test]
    async fn test_terminal_jobs_never_change() {
        let repo = InMemoryJobRepository::new();
        let job = repo.create(Uuid::now_v7(), Uuid::now_v7()).await.unwrap();
        repo.claim_next().await.unwrap().unwrap();

        assert!(repo.complete(job.id, "Completed").await.unwrap());
        assert!(!repo.fail(job.id, None, "late").await.unwrap());
        assert!(!repo.mark_cancelled(job.id).await.unwrap());
        assert!(repo.claim_next().await.unwrap().is_none());

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.progress_percent, 100);
    }

    #[tokio::test]
    async fn test_create_deduplicated_blocks_active_episode() {
        let repo = InMemoryJobRepository::new();
        let episode_id = Uuid::now_v7();

        let first = repo
            .create_deduplicated(episode_id, Uuid::nil(), JobKind::Process)
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(repo
            .create_deduplicated(episode_id, Uuid::nil(), JobKind::ExtractTerms)
            .await
            .unwrap()
            .is_none());

        repo.request_cancel(first.unwrap().id, false).await.unwrap();
        let terms_job = repo
            .create_deduplicated(episode_id, Uuid::nil(), JobKind::ExtractTerms)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(terms_job.kind, JobKind::ExtractTerms);
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_jobs_once() {
        let repo = InMemoryJobRepository::new();
        repo.create(Uuid::now_v7(), Uuid::nil()).await.unwrap();
        let mut job = repo.claim_next().await.unwrap().unwrap();
        job.updated_at = Utc::now() - chrono::Duration::hours(2);
        repo.put(job.clone());

        let swept = repo.sweep_orphans(Duration::from_secs(1800)).await.unwrap();
        assert_eq!(swept, vec![job.id]);

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failure);
        assert_eq!(stored.error_message.as_deref(), Some(ORPHAN_ERROR_MESSAGE));

        assert!(repo
            .sweep_orphans(Duration::from_secs(0))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_sweep_leaves_queued_jobs_alone() {
        let repo = InMemoryJobRepository::new();
        let mut queued = repo.create(Uuid::now_v7(), Uuid::nil()).await.unwrap();
        queued.updated_at = Utc::now() - chrono::Duration::minutes(45);
        repo.put(queued.clone());

        let swept = repo.sweep_orphans(Duration::from_secs(30 * 60)).await.unwrap();
        assert!(swept.is_empty());

        let stored = repo.get(queued.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(repo.claim_next().await.unwrap().map(|j| j.id), Some(queued.id));
    }

    #[tokio::test]
    async fn test_heartbeat_touches_only_running_jobs() {
        let repo = InMemoryJobRepository::new();
        let mut queued = repo.create(Uuid::now_v7(), Uuid::nil()).await.unwrap();
        queued.updated_at = Utc::now() - chrono::Duration::hours(1);
        repo.put(queued.clone());
        repo.heartbeat(queued.id).await.unwrap();
        assert_eq!(repo.get(queued.id).await.unwrap().unwrap().updated_at, queued.updated_at);

        let mut running = repo.claim_next().await.unwrap().unwrap();
        running.updated_at = Utc::now() - chrono::Duration::hours(1);
        running.current_step = Some("Transcribing audio".to_string());
        repo.put(running.clone());
        repo.heartbeat(running.id).await.unwrap();

        let stored = repo.get(running.id).await.unwrap().unwrap();
        assert!(stored.updated_at > Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(stored.current_step.as_deref(), Some("Transcribing audio"));
    }

    #[tokio::test]
    async fn test_notifications_newest_first_and_read_flags() {
        use echolens_core::{NotificationKind, NotificationLevel};

        let repo = InMemoryJobRepository::new();
        let first = repo
            .add_notification(NewNotification::new(
                NotificationKind::JobStarted,
                NotificationLevel::Info,
                "Processing Started",
                "Started processing: Episode",
            ))
            .await
            .unwrap();
        repo.add_notification(NewNotification::new(
            NotificationKind::JobCompleted,
            NotificationLevel::Success,
            "Processing Complete",
            "Finished processing: Episode",
        ))
        .await
        .unwrap();

        let all = repo.notifications(false, 10).await.unwrap();
        assert_eq!(all[0].kind, NotificationKind::JobCompleted);
        assert_eq!(all[1].id, first.id);

        assert!(repo.mark_notification_read(first.id).await.unwrap());
        assert!(!repo.mark_notification_read(Uuid::now_v7()).await.unwrap());
        let unread = repo.notifications(true, 10).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::JobCompleted);

        assert_eq!(repo.mark_all_notifications_read().await.unwrap(), 1);
        assert!(repo.notifications(true, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logs_keep_tail() {
        let repo = InMemoryJobRepository::new();
        let id = Uuid::now_v7();
        for i in 0..5 {
            repo.append_log(id, "info", &format!("line {}", i)).await.unwrap();
        }
        let logs = repo.logs(id, 2).await.unwrap();
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_copy_and_delete_artifacts() {
        let repo = InMemoryArtifactRepository::new();
        let source = episode("https://example.com/a.mp3");
        let target = episode("https://example.com/a.mp3");
        repo.add_episode(source.clone());
        repo.add_episode(target.clone());

        repo.save_transcript(source.id, "hello").await.unwrap();
        repo.save_summary(source.id, "summary").await.unwrap();
        repo.insert_slices(
            &source,
            &[NewVectorSlice {
                chunk_index: 0,
                text: "hello".to_string(),
                embedding: Vector::from(vec![1.0, 0.0]),
            }],
        )
        .await
        .unwrap();

        let duplicate = repo
            .find_processed_duplicate(&target.audio_url, target.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(duplicate.id, source.id);

        let copied = repo.copy_artifacts(&source, &target).await.unwrap();
        assert_eq!(copied.transcripts, 1);
        assert_eq!(copied.slices, 1);

        let again = repo.copy_artifacts(&source, &target).await.unwrap();
        assert_eq!(again.total(), 0);

        let deleted = repo.delete_artifacts(target.id).await.unwrap();
        assert_eq!(deleted.total(), 3);
        assert_eq!(repo.counts(source.id).total(), 3);
    }
}
