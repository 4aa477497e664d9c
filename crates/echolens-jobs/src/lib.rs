//! # echolens-jobs
//!
//! Episode processing pipeline and the worker that runs it.
//!
//! This crate provides:
//! - The staged pipeline (download, transcription, embeddings, terms, summary, summary audio)
//! - A concurrent job worker with new-job notification and per-job timeouts
//! - The periodic orphan sweep
//! - Cooperative cancellation with optional artifact cleanup
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use echolens_jobs::{EpisodePipeline, PipelineConfig, PromptLibrary, WorkerBuilder, WorkerConfig};
//!
//! let pipeline = EpisodePipeline::new(
//!     jobs.clone(),
//!     artifacts.clone(),
//!     adapters,
//!     Arc::new(TiktokenTokenizer::cl100k()?),
//!     Arc::new(PromptLibrary::load()?),
//!     PipelineConfig::from_env(),
//! )?;
//!
//! let handle = WorkerBuilder::new(jobs)
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(Arc::new(pipeline))
//!     .build()?
//!     .start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod audio;
pub mod cancel;
pub mod handler;
pub mod memory;
pub mod pipeline;
pub mod prompts;
pub mod summarize;
pub mod sweep;
pub mod terms;
pub mod worker;

// Re-export core types
pub use echolens_core::*;

pub use audio::{AudioConfig, AudioFetcher, AudioSegment};
pub use cancel::{
    cleanup_episode, episode_dir, CancelOutcome, CancelRegistry, CleanupReport, JobCanceller,
};
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use memory::{InMemoryArtifactRepository, InMemoryJobRepository};
pub use pipeline::{EpisodePipeline, PipelineConfig};
pub use prompts::PromptLibrary;
pub use summarize::Summarizer;
pub use sweep::OrphanSweeper;
pub use terms::{merge_terms, rank_terms, TermExtractor};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
