//! Periodic orphan sweep.
//!
//! Jobs left `in_progress` without an update for longer than the orphan
//! timeout are marked failed. Queued jobs are never swept: a long backlog is
//! not an orphan. The sweep runs on its own interval, independent of any job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use echolens_core::defaults::{ORPHAN_ERROR_MESSAGE, ORPHAN_TIMEOUT_SECS};
use echolens_core::{
    JobRepository, NewNotification, NotificationKind, NotificationLevel, Result,
};

use crate::cancel::CancelRegistry;
use crate::worker::WorkerEvent;

/// Marks stale jobs as failed.
#[derive(Clone)]
pub struct OrphanSweeper {
    jobs: Arc<dyn JobRepository>,
    timeout: Duration,
    registry: Option<CancelRegistry>,
    events: Option<broadcast::Sender<WorkerEvent>>,
}

impl OrphanSweeper {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            timeout: Duration::from_secs(ORPHAN_TIMEOUT_SECS),
            registry: None,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trip the tokens of swept jobs still running in this process.
    pub fn with_registry(mut self, registry: CancelRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one sweep pass and return the ids of the jobs marked failed.
    pub async fn sweep_once(&self) -> Result<Vec<Uuid>> {
        let swept = self.jobs.sweep_orphans(self.timeout).await?;
        if swept.is_empty() {
            debug!(subsystem = "jobs", component = "sweeper", "No orphaned jobs");
            return Ok(swept);
        }

        for job_id in &swept {
            if let Some(ref registry) = self.registry {
                registry.cancel(*job_id);
            }
            self.jobs
                .record_log(*job_id, "error", ORPHAN_ERROR_MESSAGE)
                .await;
        }

        warn!(
            subsystem = "jobs",
            component = "sweeper",
            op = "sweep_orphans",
            count = swept.len(),
            timeout_secs = self.timeout.as_secs(),
            "Marked orphaned jobs as failed"
        );

        self.jobs
            .record_notification(NewNotification::new(
                NotificationKind::OrphansSwept,
                NotificationLevel::Warning,
                "Orphaned Jobs Cleaned",
                format!("Cleaned up {} orphaned job(s)", swept.len()),
            ))
            .await;

        if let Some(ref events) = self.events {
            let _ = events.send(WorkerEvent::OrphansSwept {
                job_ids: swept.clone(),
            });
        }

        Ok(swept)
    }

    /// Sweep immediately, then every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(
            subsystem = "jobs",
            component = "sweeper",
            interval_secs = interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Orphan sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(subsystem = "jobs", component = "sweeper", error = %e, "Orphan sweep failed");
                    }
                }
            }
        }

        debug!(subsystem = "jobs", component = "sweeper", "Orphan sweeper stopped");
    }
}
