//! EchoLens API server and pipeline worker host.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use echolens_api::{router, AppState};
use echolens_core::{ArtifactRepository, JobRepository, TiktokenTokenizer};
use echolens_db::{log_pool_metrics, Database, PoolConfig};
use echolens_inference::{Adapters, InferenceConfig};
use echolens_jobs::{
    CancelRegistry, EpisodePipeline, JobCanceller, OrphanSweeper, PipelineConfig, PromptLibrary,
    WorkerBuilder, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "echolens_api=debug,echolens_jobs=info,echolens_db=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("echolens-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/echolens".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("database connection failed")?;
    db.migrate().await.context("database migration failed")?;
    log_pool_metrics(db.pool());

    let pool_monitor = {
        let pool = db.pool().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_pool_metrics(&pool);
            }
        })
    };

    let inference = InferenceConfig::load().context("invalid inference configuration")?;
    for missing in inference.missing_api_keys() {
        warn!(subsystem = "api", service = missing, "No API key configured");
    }

    // Stored vectors must match the embedding model before any job runs.
    let migrated = db
        .validate_embedding_dimensions(inference.embedding_dimension)
        .await
        .context("embedding dimension check failed")?;
    if !migrated.is_empty() {
        warn!(
            subsystem = "api",
            tables = ?migrated,
            dimension = inference.embedding_dimension,
            "Embedding columns migrated to configured dimension"
        );
    }

    let adapters = Adapters::from_config(&inference)?;
    let tokenizer = Arc::new(TiktokenTokenizer::cl100k()?);
    let prompts = Arc::new(PromptLibrary::load()?);

    let jobs: Arc<dyn JobRepository> = db.jobs.clone();
    let artifacts: Arc<dyn ArtifactRepository> = db.artifacts.clone();

    let pipeline_config = PipelineConfig::from_env();
    let tts_enabled = pipeline_config.tts_enabled && inference.tts_enabled;
    let pipeline_config = pipeline_config.with_tts_enabled(tts_enabled);
    let upload_dir = pipeline_config.upload_dir().to_path_buf();
    let pipeline = EpisodePipeline::new(
        jobs.clone(),
        artifacts.clone(),
        adapters.clone(),
        tokenizer,
        prompts,
        pipeline_config,
    )?;

    // One registry so API cancels reach jobs running in this process.
    let registry = CancelRegistry::new();
    let worker_config = WorkerConfig::from_env();
    let sweeper = OrphanSweeper::new(jobs.clone())
        .with_timeout(Duration::from_secs(worker_config.orphan_timeout_secs))
        .with_registry(registry.clone());

    let worker = if worker_config.enabled {
        let worker = WorkerBuilder::new(jobs.clone())
            .with_config(worker_config)
            .with_handler(Arc::new(pipeline))
            .with_registry(registry.clone())
            .with_notify(db.job_notify())
            .build()?;
        Some(worker.start())
    } else {
        info!("Job worker disabled (WORKER_ENABLED=false)");
        None
    };

    let state = AppState {
        canceller: JobCanceller::new(jobs.clone(), artifacts.clone(), registry, upload_dir),
        jobs,
        artifacts,
        sweeper,
        embedding: Some(adapters.embedding.clone()),
    };

    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        info!("Stopping job worker...");
        if let Err(e) = worker.shutdown().await {
            error!(error = %e, "Job worker did not stop cleanly");
        }
        if let Err(e) = worker.join().await {
            error!(error = %e, "Job worker task failed");
        }
    }

    pool_monitor.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
