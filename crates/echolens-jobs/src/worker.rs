//! Job worker and runner for processing episode jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use echolens_core::defaults;
use echolens_core::{Error, Job, JobRepository, Result, Stage};

use crate::cancel::CancelRegistry;
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::sweep::OrphanSweeper;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit for one job.
    pub job_timeout_secs: u64,
    /// Interval between orphan sweeps.
    pub sweep_interval_secs: u64,
    /// Age after which an unfinished job is considered orphaned.
    pub orphan_timeout_secs: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
            orphan_timeout_secs: defaults::ORPHAN_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `2` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `14400` | Wall-clock limit per job |
    /// | `SWEEP_INTERVAL_SECS` | `300` | Orphan sweep interval |
    /// | `ORPHAN_TIMEOUT_SECS` | `1800` | Staleness threshold for the sweep |
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            poll_interval_ms: parse("JOB_POLL_INTERVAL_MS", defaults::JOB_POLL_INTERVAL_MS),
            max_concurrent_jobs: parse("JOB_MAX_CONCURRENT", defaults::JOB_MAX_CONCURRENT).max(1),
            job_timeout_secs: parse("JOB_TIMEOUT_SECS", defaults::JOB_TIMEOUT_SECS),
            sweep_interval_secs: parse("SWEEP_INTERVAL_SECS", defaults::SWEEP_INTERVAL_SECS).max(1),
            orphan_timeout_secs: parse("ORPHAN_TIMEOUT_SECS", defaults::ORPHAN_TIMEOUT_SECS),
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_sweep(mut self, interval_secs: u64, orphan_timeout_secs: u64) -> Self {
        self.sweep_interval_secs = interval_secs.max(1);
        self.orphan_timeout_secs = orphan_timeout_secs;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// A job was claimed and started.
    JobStarted { job_id: Uuid, episode_id: Uuid },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, step: String },
    /// A job failed.
    JobFailed { job_id: Uuid, error: String },
    /// A job stopped after a cancel request.
    JobCancelled { job_id: Uuid, cleaned_up: bool },
    /// The orphan sweep failed these jobs.
    OrphansSwept { job_ids: Vec<Uuid> },
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
///
/// Dropping the handle also stops the worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    registry: CancelRegistry,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down. Running jobs are cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Registry of the jobs running in this worker.
    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    registry: CancelRegistry,
    notify: Option<Arc<Notify>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            handler,
            config,
            registry: CancelRegistry::new(),
            notify: None,
            event_tx,
        }
    }

    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let registry = self.registry.clone();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            registry,
            task,
        }
    }

    /// Run the worker loop.
    ///
    /// Keeps up to `max_concurrent_jobs` jobs in flight, refilling a slot as
    /// soon as a job finishes. Sleeps only while the queue is empty or every
    /// slot is busy, waking early on a new-job notification.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            handler = self.handler.name(),
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            job_timeout_secs = self.config.job_timeout_secs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let sweeper_shutdown = CancellationToken::new();
        let sweeper = OrphanSweeper::new(self.jobs.clone())
            .with_timeout(Duration::from_secs(self.config.orphan_timeout_secs))
            .with_registry(self.registry.clone())
            .with_events(self.event_tx.clone());
        let sweeper_task = tokio::spawn(sweeper.run(
            Duration::from_secs(self.config.sweep_interval_secs),
            sweeper_shutdown.clone(),
        ));

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            let notify = self.notify.clone();
            let notified = async move {
                match notify {
                    Some(n) => n.notified().await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                _ = notified => {
                    debug!("Woken by new job notification");
                }
                _ = sleep(poll_interval) => {}
            }
        }

        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelling running jobs for shutdown");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Job task panicked");
            }
        }

        sweeper_shutdown.cancel();
        if let Err(e) = sweeper_task.await {
            error!(error = ?e, "Orphan sweeper task panicked");
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<Job> {
        match self.jobs.claim_next().await {
            Ok(job) => job,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: self.jobs.clone(),
            handler: self.handler.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: Duration::from_secs(self.config.job_timeout_secs),
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    registry: CancelRegistry,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl JobWorkerRef {
    /// Execute a single claimed job.
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let episode_id = job.episode_id;
        let guard = self.registry.register(job_id);
        let token = guard.token();

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            episode_id = %episode_id,
            "Processing job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, episode_id });
        self.jobs
            .record_log(job_id, "info", "Job claimed by worker")
            .await;

        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job)
            .with_cancel_token(token.clone())
            .with_progress_callback(move |percent, message| {
                let _ = event_tx.send(WorkerEvent::JobProgress {
                    job_id,
                    percent,
                    message: message.map(String::from),
                });
            });

        let result = match tokio::time::timeout(self.job_timeout, self.handler.execute(ctx)).await
        {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                let secs = self.job_timeout.as_secs();
                warn!(job_id = %job_id, "Job exceeded timeout of {}s", secs);
                let stage = match self.jobs.get(job_id).await {
                    Ok(Some(job)) => job.current_step.as_deref().and_then(Stage::from_step),
                    _ => None,
                };
                JobResult::Failed {
                    stage,
                    message: format!("Job timed out after {}s", secs),
                }
            }
        };
        drop(guard);

        self.record_result(job_id, result, start).await;
    }

    async fn record_result(&self, job_id: Uuid, result: JobResult, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;

        let (applied, level, message, event) = match result {
            JobResult::Success { step } => (
                self.jobs.complete(job_id, &step).await,
                "info",
                step.clone(),
                WorkerEvent::JobCompleted { job_id, step },
            ),
            JobResult::Failed { stage, message } => (
                self.jobs
                    .fail(job_id, stage.as_ref().map(Stage::as_str), &message)
                    .await,
                "error",
                message.clone(),
                WorkerEvent::JobFailed {
                    job_id,
                    error: message,
                },
            ),
            JobResult::Cancelled { cleaned_up } => (
                self.jobs.mark_cancelled(job_id).await,
                "warn",
                if cleaned_up {
                    "Cancelled, artifacts removed".to_string()
                } else {
                    "Cancelled".to_string()
                },
                WorkerEvent::JobCancelled { job_id, cleaned_up },
            ),
        };

        match applied {
            Ok(true) => {
                self.jobs.record_log(job_id, level, &message).await;
                match event {
                    WorkerEvent::JobFailed { ref error, .. } => warn!(
                        job_id = %job_id,
                        %error,
                        duration_ms,
                        "Job failed"
                    ),
                    _ => info!(job_id = %job_id, result = %message, duration_ms, "Job finished"),
                }
                let _ = self.event_tx.send(event);
            }
            Ok(false) => {
                warn!(
                    job_id = %job_id,
                    result = %message,
                    "Job state changed while running, result discarded"
                );
            }
            Err(e) => {
                error!(error = ?e, job_id = %job_id, "Failed to record job result");
            }
        }
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handler: Option<Arc<dyn JobHandler>>,
    registry: Option<CancelRegistry>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handler: None,
            registry: None,
            notify: None,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the handler that runs claimed jobs.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Share a cancel registry, e.g. with the API's canceller.
    pub fn with_registry(mut self, registry: CancelRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wake the worker when the repository signals a new job.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> Result<JobWorker> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Config("Job worker needs a handler".to_string()))?;

        let mut worker = JobWorker::new(self.jobs, handler, self.config);
        if let Some(registry) = self.registry {
            worker.registry = registry;
        }
        worker.notify = self.notify;
        Ok(worker)
    }
}
