//! Cooperative cancellation and artifact cleanup.
//!
//! A cancel request is persisted on the job row first, then the in-process
//! token of a running job is tripped. The pipeline checks both at every stage
//! boundary, so a job running in another process still stops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use echolens_core::{
    ArtifactCounts, ArtifactRepository, Episode, Error, Job, JobRepository, JobStatus, Result,
};

/// Tokens of the jobs running in this process.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running job. The token is removed when the guard drops.
    pub fn register(&self, job_id: Uuid) -> CancelGuard {
        let token = CancellationToken::new();
        self.lock().insert(job_id, token.clone());
        CancelGuard {
            registry: self.clone(),
            job_id,
            token,
        }
    }

    /// Trip the token of a running job. Returns `false` if the job is not
    /// running in this process.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Trip every registered token.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.lock();
        tokens.values().for_each(CancellationToken::cancel);
        tokens.len()
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.lock().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one running job.
pub struct CancelGuard {
    registry: CancelRegistry,
    job_id: Uuid,
    token: CancellationToken,
}

impl CancelGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.job_id);
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

/// What a cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    #[serde(flatten)]
    pub artifacts: ArtifactCounts,
    pub audio_removed: bool,
}

/// Directory holding an episode's audio, segments and summary audio.
pub fn episode_dir(upload_dir: &Path, episode: &Episode) -> PathBuf {
    upload_dir
        .join(crate::audio::slugify(&episode.podcast_slug))
        .join(episode.id.to_string())
}

/// Delete transcript, summary, terms and slices of an episode, remove its
/// audio directory and clear the stored audio path.
pub async fn cleanup_episode(
    artifacts: &dyn ArtifactRepository,
    upload_dir: &Path,
    episode: &Episode,
) -> Result<CleanupReport> {
    let counts = artifacts.delete_artifacts(episode.id).await?;

    let dir = match episode.local_audio_path {
        Some(ref path) => Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| episode_dir(upload_dir, episode)),
        None => episode_dir(upload_dir, episode),
    };

    let audio_removed = match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(
                subsystem = "jobs",
                component = "cancel",
                episode_id = %episode.id,
                dir = %dir.display(),
                error = %e,
                "Failed to remove episode directory"
            );
            false
        }
    };

    if episode.local_audio_path.is_some() {
        artifacts.set_local_audio_path(episode.id, None).await?;
    }

    info!(
        subsystem = "jobs",
        component = "cancel",
        op = "cleanup",
        episode_id = %episode.id,
        transcripts = counts.transcripts,
        summaries = counts.summaries,
        terms = counts.terms,
        slices = counts.slices,
        audio_removed,
        "Episode artifacts removed"
    );

    Ok(CleanupReport {
        artifacts: counts,
        audio_removed,
    })
}

// =============================================================================
// CANCELLER
// =============================================================================

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub job: Job,
    /// Cleanup ran as part of this request.
    pub cleanup_performed: bool,
    /// Cleanup will run when the running job reaches its next stage boundary.
    pub cleanup_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CleanupReport>,
}

/// Implements "cancel job, with or without cleanup".
#[derive(Clone)]
pub struct JobCanceller {
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    registry: CancelRegistry,
    upload_dir: PathBuf,
}

impl JobCanceller {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        registry: CancelRegistry,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            registry,
            upload_dir: upload_dir.into(),
        }
    }

    /// Cancel a job. Pending jobs are cancelled at once; running jobs stop at
    /// the next stage boundary. Finished jobs are a conflict.
    pub async fn cancel(&self, job_id: Uuid, cleanup: bool) -> Result<CancelOutcome> {
        let current = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;

        if matches!(current.status, JobStatus::Success | JobStatus::Failure) {
            return Err(Error::Conflict(format!(
                "Job {} already finished with status {}",
                job_id, current.status
            )));
        }

        let job = self
            .jobs
            .request_cancel(job_id, cleanup)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;

        let signalled = self.registry.cancel(job_id);
        debug!(
            subsystem = "jobs",
            component = "cancel",
            job_id = %job_id,
            status = %job.status,
            signalled,
            "Cancel requested"
        );

        self.jobs
            .record_log(
                job_id,
                "warn",
                if cleanup {
                    "Cancellation requested with cleanup"
                } else {
                    "Cancellation requested"
                },
            )
            .await;

        // Running jobs clean up after themselves at the next stage boundary.
        if job.status == JobStatus::InProgress {
            return Ok(CancelOutcome {
                job,
                cleanup_performed: false,
                cleanup_pending: cleanup,
                report: None,
            });
        }

        if !cleanup {
            return Ok(CancelOutcome {
                job,
                cleanup_performed: false,
                cleanup_pending: false,
                report: None,
            });
        }

        let episode = self
            .artifacts
            .get_episode(job.episode_id)
            .await?
            .ok_or(Error::EpisodeNotFound(job.episode_id))?;
        let report = cleanup_episode(self.artifacts.as_ref(), &self.upload_dir, &episode).await?;

        Ok(CancelOutcome {
            job,
            cleanup_performed: true,
            cleanup_pending: false,
            report: Some(report),
        })
    }
}
