//! # echolens-db
//!
//! PostgreSQL database layer for the EchoLens episode pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The processing job store (claiming, guarded transitions, orphan sweep, logs)
//! - Episode artifact storage (transcripts, summaries, terms, vector slices)
//! - Vector search over transcript slices with pgvector
//! - Startup validation of embedding column dimensions
//!
//! ## Example
//!
//! ```rust,ignore
//! use echolens_core::JobKind;
//! use echolens_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/echolens").await?;
//!     db.migrate().await?;
//!
//!     if let Some(job) = db.jobs.create_deduplicated(episode_id, podcast_id, JobKind::Process).await? {
//!         println!("Queued job: {}", job.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod jobs;
pub mod pool;
pub mod schema;
pub mod test_fixtures;

use std::sync::Arc;

use tokio::sync::Notify;

pub use artifacts::PgArtifactRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use schema::{validate_embedding_dimensions, EMBEDDING_TABLES};

// Re-export the traits so callers need only this crate for repository access.
pub use echolens_core::{ArtifactRepository, Error, JobRepository, Result};

/// Database handle holding every repository over one shared pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Processing job store.
    pub jobs: Arc<PgJobRepository>,
    /// Episode artifact store.
    pub artifacts: Arc<PgArtifactRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            artifacts: Arc::new(PgArtifactRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Check (and where possible migrate) embedding column dimensions.
    pub async fn validate_embedding_dimensions(&self, expected: usize) -> Result<Vec<String>> {
        validate_embedding_dimensions(&self.pool, expected).await
    }

    /// Handle notified whenever a job is queued.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.jobs.job_notify()
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
