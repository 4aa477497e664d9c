//! Job repository implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use echolens_core::defaults::{ORPHAN_ERROR_MESSAGE, RECENT_JOB_LIMIT};
use echolens_core::{
    Error, Job, JobFilter, JobKind, JobLogEntry, JobRepository, JobStatus, NewNotification,
    Notification, QueueStats, Result, TaskOverview,
};

const JOB_COLUMNS: &str = "id, episode_id, podcast_id, kind, status, current_step, progress_percent, \
     error_message, failed_stage, cancel_requested, cancel_cleanup, \
     created_at, started_at, updated_at, completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken whenever a job is queued so idle workers skip the poll delay.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Status strings from which `next` may be reached.
    fn sources(next: JobStatus) -> Vec<String> {
        JobStatus::sources_of(next)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.try_get("status").map_err(Error::Database)?;
        let kind: String = row.try_get("kind").map_err(Error::Database)?;
        Ok(Job {
            id: row.try_get("id").map_err(Error::Database)?,
            episode_id: row.try_get("episode_id").map_err(Error::Database)?,
            podcast_id: row.try_get("podcast_id").map_err(Error::Database)?,
            kind: kind.parse()?,
            status: status.parse()?,
            current_step: row.try_get("current_step").map_err(Error::Database)?,
            progress_percent: row.try_get("progress_percent").map_err(Error::Database)?,
            error_message: row.try_get("error_message").map_err(Error::Database)?,
            failed_stage: row.try_get("failed_stage").map_err(Error::Database)?,
            cancel_requested: row.try_get("cancel_requested").map_err(Error::Database)?,
            cancel_cleanup: row.try_get("cancel_cleanup").map_err(Error::Database)?,
            created_at: row.try_get("created_at").map_err(Error::Database)?,
            started_at: row.try_get("started_at").map_err(Error::Database)?,
            updated_at: row.try_get("updated_at").map_err(Error::Database)?,
            completed_at: row.try_get("completed_at").map_err(Error::Database)?,
        })
    }

    fn parse_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Job>> {
        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn fetch_by_status(&self, statuses: &[&str], limit: Option<i64>) -> Result<Vec<Job>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs
             WHERE status = ANY($1)
             ORDER BY COALESCE(completed_at, started_at, created_at) DESC
             LIMIT $2"
        ))
        .bind(&statuses)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    fn parse_notification_row(row: sqlx::postgres::PgRow) -> Result<Notification> {
        let kind: String = row.try_get("kind").map_err(Error::Database)?;
        let level: String = row.try_get("level").map_err(Error::Database)?;
        Ok(Notification {
            id: row.try_get("id").map_err(Error::Database)?,
            kind: kind.parse()?,
            level: level.parse()?,
            title: row.try_get("title").map_err(Error::Database)?,
            message: row.try_get("message").map_err(Error::Database)?,
            job_id: row.try_get("job_id").map_err(Error::Database)?,
            episode_id: row.try_get("episode_id").map_err(Error::Database)?,
            podcast_id: row.try_get("podcast_id").map_err(Error::Database)?,
            read: row.try_get("read").map_err(Error::Database)?,
            created_at: row.try_get("created_at").map_err(Error::Database)?,
        })
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, kind, level, title, message, job_id, episode_id, podcast_id, read, created_at";

#[async_trait]
impl JobRepository for PgJobRepository {
    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "create"))]
    async fn create(&self, episode_id: Uuid, podcast_id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "INSERT INTO processing_jobs (id, episode_id, podcast_id, status, current_step, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', NULL, $4, $4)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(episode_id)
        .bind(podcast_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_one();
        Self::parse_job_row(row)
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "create_deduplicated"))]
    async fn create_deduplicated(
        &self,
        episode_id: Uuid,
        podcast_id: Uuid,
        kind: JobKind,
    ) -> Result<Option<Job>> {
        // Single statement; the partial unique index catches a concurrent winner.
        let result = sqlx::query(&format!(
            "INSERT INTO processing_jobs (id, episode_id, podcast_id, kind, status, created_at, updated_at)
             SELECT $1, $2, $3, $5, 'pending', $4, $4
             WHERE NOT EXISTS (
                 SELECT 1 FROM processing_jobs
                 WHERE episode_id = $2 AND status IN ('pending', 'in_progress')
             )
             ON CONFLICT DO NOTHING
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(episode_id)
        .bind(podcast_id)
        .bind(Utc::now())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match result {
            Some(row) => {
                self.notify.notify_one();
                Ok(Some(Self::parse_job_row(row)?))
            }
            None => {
                debug!(%episode_id, "Active job already exists, not queueing");
                Ok(None)
            }
        }
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "UPDATE processing_jobs
             SET status = 'in_progress', started_at = $1, updated_at = $1,
                 progress_percent = 0
             WHERE id = (
                 SELECT id FROM processing_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn update_progress(&self, job_id: Uuid, step: &str, percent: i32) -> Result<()> {
        sqlx::query(
            "UPDATE processing_jobs
             SET current_step = $2, progress_percent = $3, updated_at = $4
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(job_id)
        .bind(step)
        .bind(percent.clamp(0, 100))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE processing_jobs SET updated_at = $2
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "complete"))]
    async fn complete(&self, job_id: Uuid, step: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'success', current_step = $2, progress_percent = 100,
                 error_message = NULL, updated_at = $3, completed_at = $3
             WHERE id = $1 AND status = ANY($4)",
        )
        .bind(job_id)
        .bind(step)
        .bind(now)
        .bind(Self::sources(JobStatus::Success))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, error), fields(subsystem = "db", component = "jobs", op = "fail"))]
    async fn fail(&self, job_id: Uuid, stage: Option<&str>, error: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'failure', failed_stage = $2, error_message = $3,
                 updated_at = $4, completed_at = $4
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(job_id)
        .bind(stage)
        .bind(error)
        .bind(now)
        .bind(Self::sources(JobStatus::Failure))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "mark_cancelled"))]
    async fn mark_cancelled(&self, job_id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'cancelled', cancel_requested = true,
                 updated_at = $2, completed_at = $2
             WHERE id = $1 AND status = ANY($3)",
        )
        .bind(job_id)
        .bind(now)
        .bind(Self::sources(JobStatus::Cancelled))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "request_cancel"))]
    async fn request_cancel(&self, job_id: Uuid, cleanup: bool) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Pending jobs have no worker to observe the flag; cancel them outright.
        sqlx::query(
            "UPDATE processing_jobs
             SET status = 'cancelled', completed_at = $2
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "UPDATE processing_jobs
             SET cancel_requested = true, cancel_cleanup = $2, updated_at = $3
             WHERE id = $1 AND status IN ('in_progress', 'cancelled')
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(cleanup)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let job = match row {
            Some(row) => Some(Self::parse_job_row(row)?),
            None => {
                // Success/failure: leave untouched, report current state.
                let row = sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1"
                ))
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;
                row.map(Self::parse_job_row).transpose()?
            }
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(job)
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM processing_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(flag.unwrap_or(false))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::uuid IS NULL OR episode_id = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.episode_id)
        .bind(filter.limit.unwrap_or(echolens_core::defaults::PAGE_LIMIT))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_rows(rows)
    }

    async fn task_overview(&self) -> Result<TaskOverview> {
        let active = self.fetch_by_status(&["in_progress"], None).await?;
        let mut queued = self.fetch_by_status(&["pending"], None).await?;
        queued.sort_by_key(|j| j.created_at);
        let recent = self
            .fetch_by_status(
                &["success", "failure", "cancelled"],
                Some(RECENT_JOB_LIMIT),
            )
            .await?;

        Ok(TaskOverview {
            active,
            queued,
            recent,
        })
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') as in_progress,
                COUNT(*) FILTER (WHERE status = 'success' AND completed_at > NOW() - INTERVAL '1 hour') as succeeded_last_hour,
                COUNT(*) FILTER (WHERE status = 'failure' AND completed_at > NOW() - INTERVAL '1 hour') as failed_last_hour,
                COUNT(*) FILTER (WHERE status = 'cancelled' AND completed_at > NOW() - INTERVAL '1 hour') as cancelled_last_hour,
                COUNT(*) as total
             FROM processing_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            in_progress: row.get::<i64, _>("in_progress"),
            succeeded_last_hour: row.get::<i64, _>("succeeded_last_hour"),
            failed_last_hour: row.get::<i64, _>("failed_last_hour"),
            cancelled_last_hour: row.get::<i64, _>("cancelled_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "jobs", op = "sweep_orphans"))]
    async fn sweep_orphans(&self, timeout: Duration) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(timeout)
                .map_err(|e| Error::InvalidInput(format!("Invalid sweep timeout: {}", e)))?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE processing_jobs
             SET status = 'failure', error_message = $1,
                 updated_at = $2, completed_at = $2
             WHERE status = 'in_progress' AND updated_at < $3
             RETURNING id",
        )
        .bind(ORPHAN_ERROR_MESSAGE)
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        if !ids.is_empty() {
            info!(
                subsystem = "db",
                component = "jobs",
                op = "sweep_orphans",
                count = ids.len(),
                timeout_secs = timeout.as_secs(),
                "Marked orphaned jobs as failed"
            );
        }
        Ok(ids)
    }

    async fn clear_history(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM processing_jobs WHERE status IN ('success', 'failure', 'cancelled')",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn append_log(&self, job_id: Uuid, level: &str, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO job_logs (job_id, level, message) VALUES ($1, $2, $3)")
            .bind(job_id)
            .bind(level)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    async fn logs(&self, job_id: Uuid, limit: i64) -> Result<Vec<JobLogEntry>> {
        let rows = sqlx::query(
            "SELECT job_id, level, message, created_at FROM (
                 SELECT id, job_id, level, message, created_at FROM job_logs
                 WHERE job_id = $1
                 ORDER BY id DESC
                 LIMIT $2
             ) tail
             ORDER BY id ASC",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| JobLogEntry {
                job_id: row.get("job_id"),
                level: row.get("level"),
                message: row.get("message"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn add_notification(&self, notification: NewNotification) -> Result<Notification> {
        let row = sqlx::query(&format!(
            "INSERT INTO notifications
                 (id, kind, level, title, message, job_id, episode_id, podcast_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(notification.kind.as_str())
        .bind(notification.level.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.job_id)
        .bind(notification.episode_id)
        .bind(notification.podcast_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_notification_row(row)
    }

    async fn notifications(&self, unread_only: bool, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE NOT ($1 AND read)
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(unread_only)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_notification_row).collect()
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE NOT read")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
