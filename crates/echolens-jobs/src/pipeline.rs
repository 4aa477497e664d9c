//! Episode processing pipeline.
//!
//! Runs the stages of the job's kind one after another for a claimed job.
//! A full run walks [`Stage::ORDER`]; a terms-only run adds the terms a
//! podcast does not know yet from the stored transcript. Every full-run stage
//! skips work whose artifact already exists, so a resubmitted episode resumes
//! where the previous job stopped. Cancellation is checked between stages
//! only, while a heartbeat keeps long stages clear of the orphan sweep.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use echolens_core::defaults::{self, SUMMARY_AUDIO_FILE};
use echolens_core::{
    ArtifactRepository, ChunkerConfig, Episode, Error, JobKind, JobRepository, NewNotification,
    NewTerm, NewVectorSlice, NotificationKind, NotificationLevel, Result, Stage, TokenChunker,
    Tokenizer, STEP_COMPLETED_DEDUPLICATED, STEP_STARTING,
};
use echolens_inference::Adapters;

use crate::audio::{AudioConfig, AudioFetcher};
use crate::cancel::{cleanup_episode, episode_dir};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::prompts::PromptLibrary;
use crate::summarize::Summarizer;
use crate::terms::{rank_terms, TermExtractor};

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    /// Generate spoken summaries.
    pub tts_enabled: bool,
    /// Upper bound on concurrent adapter calls within one job.
    pub concurrency: usize,
    /// How often a busy stage touches the job's `updated_at`.
    pub heartbeat_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            tts_enabled: true,
            concurrency: defaults::ADAPTER_CONCURRENCY,
            heartbeat_interval: Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `UPLOAD_DIR` | `./echolens_data/uploads` | Root for episode audio |
    /// | `KEEP_AUDIO_CHUNKS` | `false` | Keep split segments after transcription |
    /// | `TTS_ENABLED` | `true` | Generate spoken summaries |
    /// | `ADAPTER_CONCURRENCY` | `5` | Concurrent adapter calls per job |
    /// | `HEARTBEAT_INTERVAL_SECS` | `60` | Liveness touch during long stages |
    pub fn from_env() -> Self {
        let flag = |name: &str, default: bool| {
            std::env::var(name)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };

        let upload_dir =
            std::env::var("UPLOAD_DIR").unwrap_or_else(|_| defaults::UPLOAD_DIR.to_string());

        let concurrency = std::env::var("ADAPTER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::ADAPTER_CONCURRENCY)
            .max(1);

        let heartbeat_secs = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::HEARTBEAT_INTERVAL_SECS)
            .max(1);

        Self {
            audio: AudioConfig::default()
                .with_upload_dir(upload_dir)
                .with_keep_chunks(flag("KEEP_AUDIO_CHUNKS", false)),
            tts_enabled: flag("TTS_ENABLED", true),
            concurrency,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        }
    }

    pub fn with_audio(mut self, audio: AudioConfig) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_tts_enabled(mut self, enabled: bool) -> Self {
        self.tts_enabled = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.audio.upload_dir
    }
}

/// Run `work` to completion, touching the job's `updated_at` every `every`.
///
/// A failed touch is logged and the work carries on.
pub(crate) async fn heartbeat_while<T>(
    jobs: &dyn JobRepository,
    job_id: Uuid,
    every: Duration,
    work: impl Future<Output = T>,
) -> T {
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick is immediate; the stage start already wrote progress.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            out = &mut work => return out,
            _ = ticker.tick() => {
                if let Err(e) = jobs.heartbeat(job_id).await {
                    warn!(subsystem = "jobs", job_id = %job_id, error = %e, "Job heartbeat failed");
                }
            }
        }
    }
}

/// Title, message verb and failure prefix for the notifications a job kind posts.
fn notice_labels(kind: JobKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        JobKind::Process => ("Processing", "processing", "Error processing"),
        JobKind::ExtractTerms => (
            "Term Extraction",
            "term extraction",
            "Error extracting terms for",
        ),
    }
}

/// How a stage ended.
enum StageOutcome {
    Continue,
    /// The job is done early, with this final step label.
    Finished(String),
}

/// Runs the full processing pipeline for one episode.
pub struct EpisodePipeline {
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    adapters: Adapters,
    audio: AudioFetcher,
    summarizer: Summarizer,
    extractor: TermExtractor,
    tokenizer: Arc<dyn Tokenizer>,
    slicer: TokenChunker<Arc<dyn Tokenizer>>,
    config: PipelineConfig,
}

impl EpisodePipeline {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        adapters: Adapters,
        tokenizer: Arc<dyn Tokenizer>,
        prompts: Arc<PromptLibrary>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let audio = AudioFetcher::new(config.audio.clone())?;
        let summarizer = Summarizer::new(adapters.chat.clone(), prompts.clone(), tokenizer.clone())
            .with_concurrency(config.concurrency);
        let extractor = TermExtractor::new(adapters.chat.clone(), prompts, tokenizer.clone())
            .with_concurrency(config.concurrency);

        Ok(Self {
            jobs,
            artifacts,
            adapters,
            audio,
            summarizer,
            extractor,
            slicer: TokenChunker::new(ChunkerConfig::slices(), tokenizer.clone()),
            tokenizer,
            config,
        })
    }

    /// Override the chunk sizes used for summaries, term extraction and
    /// embedding slices.
    pub fn with_chunking(
        mut self,
        summary: ChunkerConfig,
        terms: ChunkerConfig,
        slices: ChunkerConfig,
    ) -> Self {
        self.summarizer = self.summarizer.with_chunker_config(summary);
        self.extractor = self.extractor.with_chunker_config(terms);
        self.slicer = TokenChunker::new(slices, self.tokenizer.clone());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Write a step to the job record, the progress callback and the job log.
    async fn progress(&self, ctx: &JobContext, step: &str, percent: i32) {
        if let Err(e) = self.jobs.update_progress(ctx.job_id(), step, percent).await {
            warn!(job_id = %ctx.job_id(), error = %e, "Failed to record progress");
        }
        ctx.report_progress(percent, Some(step));
        self.jobs.record_log(ctx.job_id(), "info", step).await;
    }

    /// Progress within a stage after `done` of `total` units.
    fn partial_progress(stage: Stage, done: usize, total: usize) -> i32 {
        Self::span_progress((stage.progress_before(), stage.progress_after()), done, total)
    }

    fn span_progress((before, after): (i32, i32), done: usize, total: usize) -> i32 {
        if total == 0 {
            return before;
        }
        before + ((after - before) as usize * done / total) as i32
    }

    async fn notify(
        &self,
        ctx: &JobContext,
        kind: NotificationKind,
        level: NotificationLevel,
        title: String,
        message: String,
    ) {
        self.jobs
            .record_notification(NewNotification::new(kind, level, title, message).for_job(&ctx.job))
            .await;
    }

    /// Post the notice matching how the job ended.
    async fn notify_finished(&self, ctx: &JobContext, episode_title: &str, result: &JobResult) {
        let (label, verb, failed) = notice_labels(ctx.job.kind);
        match result {
            JobResult::Success { .. } => {
                self.notify(
                    ctx,
                    NotificationKind::JobCompleted,
                    NotificationLevel::Success,
                    format!("{} Complete", label),
                    format!("Finished {}: {}", verb, episode_title),
                )
                .await
            }
            JobResult::Failed { message, .. } => {
                let short: String = message.chars().take(100).collect();
                self.notify(
                    ctx,
                    NotificationKind::JobFailed,
                    NotificationLevel::Error,
                    format!("{} Failed", label),
                    format!("{} {}: {}", failed, episode_title, short),
                )
                .await
            }
            JobResult::Cancelled { .. } => {
                self.notify(
                    ctx,
                    NotificationKind::JobCancelled,
                    NotificationLevel::Info,
                    format!("{} Cancelled", label),
                    format!("Cancelled {}: {}", verb, episode_title),
                )
                .await
            }
        }
    }

    async fn cancel_requested(&self, ctx: &JobContext) -> bool {
        if ctx.is_cancelled() {
            return true;
        }
        match self.jobs.is_cancel_requested(ctx.job_id()).await {
            Ok(requested) => requested,
            Err(e) => {
                warn!(job_id = %ctx.job_id(), error = %e, "Failed to read cancel flag");
                false
            }
        }
    }

    /// Stop at a stage boundary, removing artifacts if the cancel asked for it.
    async fn stop_cancelled(&self, ctx: &JobContext, stage: Stage) -> JobResult {
        let job_id = ctx.job_id();
        let cleanup = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job.cancel_cleanup,
            _ => false,
        };

        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            stage = %stage,
            cleanup,
            "Cancelled at stage boundary"
        );

        if !cleanup {
            return JobResult::Cancelled { cleaned_up: false };
        }

        let episode = match self.artifacts.get_episode(ctx.episode_id()).await {
            Ok(Some(episode)) => episode,
            Ok(None) => return JobResult::Cancelled { cleaned_up: false },
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Cannot load episode for cleanup");
                return JobResult::Cancelled { cleaned_up: false };
            }
        };

        match cleanup_episode(self.artifacts.as_ref(), self.config.upload_dir(), &episode).await {
            Ok(report) => {
                self.jobs
                    .record_log(
                        job_id,
                        "warn",
                        &format!(
                            "Cleanup removed {} artifacts (audio removed: {})",
                            report.artifacts.total(),
                            report.audio_removed
                        ),
                    )
                    .await;
                JobResult::Cancelled { cleaned_up: true }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Cleanup after cancel failed");
                JobResult::Cancelled { cleaned_up: false }
            }
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &JobContext,
        episode: &mut Episode,
    ) -> Result<StageOutcome> {
        match stage {
            Stage::CopyExisting => self.copy_existing(episode).await,
            Stage::Download => self.download(ctx, episode).await,
            Stage::Transcribe => self.transcribe(ctx, episode).await,
            Stage::Embed => self.embed(episode).await,
            Stage::ExtractTerms => self.extract_terms(ctx, episode).await,
            Stage::Summarize => self.summarize(episode).await,
            Stage::SummaryAudio => self.summary_audio(episode).await,
        }
    }

    async fn transcript_text(&self, episode: &Episode) -> Result<String> {
        self.artifacts
            .get_transcript(episode.id)
            .await?
            .map(|t| t.text)
            .ok_or_else(|| Error::NotFound(format!("Transcript for episode {}", episode.id)))
    }

    // ---------------------------------------------------------------------
    // Stages
    // ---------------------------------------------------------------------

    async fn copy_existing(&self, episode: &Episode) -> Result<StageOutcome> {
        if self.artifacts.get_transcript(episode.id).await?.is_some() {
            return Ok(StageOutcome::Continue);
        }

        let Some(source) = self
            .artifacts
            .find_processed_duplicate(&episode.audio_url, episode.id)
            .await?
        else {
            return Ok(StageOutcome::Continue);
        };

        let counts = self.artifacts.copy_artifacts(&source, episode).await?;
        info!(
            subsystem = "jobs",
            component = "pipeline",
            episode_id = %episode.id,
            source_episode = %source.id,
            transcripts = counts.transcripts,
            summaries = counts.summaries,
            terms = counts.terms,
            slices = counts.slices,
            "Copied results from already processed episode"
        );
        Ok(StageOutcome::Finished(STEP_COMPLETED_DEDUPLICATED.to_string()))
    }

    async fn download(&self, ctx: &JobContext, episode: &mut Episode) -> Result<StageOutcome> {
        if let Some(ref path) = episode.local_audio_path {
            if tokio::fs::metadata(path).await.map(|m| m.len() > 0).unwrap_or(false) {
                debug!(path = %path, "Audio already on disk");
                return Ok(StageOutcome::Continue);
            }
        }
        if self.artifacts.get_transcript(episode.id).await?.is_some() {
            debug!(episode_id = %episode.id, "Transcript exists, audio not needed");
            return Ok(StageOutcome::Continue);
        }

        let path = self.audio.download(episode, ctx.cancel_token()).await?;
        let path = path.to_string_lossy().into_owned();
        self.artifacts
            .set_local_audio_path(episode.id, Some(&path))
            .await?;
        episode.local_audio_path = Some(path);
        Ok(StageOutcome::Continue)
    }

    async fn transcribe(&self, ctx: &JobContext, episode: &Episode) -> Result<StageOutcome> {
        if self.artifacts.get_transcript(episode.id).await?.is_some() {
            return Ok(StageOutcome::Continue);
        }

        let audio = episode
            .local_audio_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| Error::NotFound(format!("No audio for episode {}", episode.id)))?;

        let segments = self.audio.prepare_segments(&audio).await?;
        let total = segments.len();
        let done = AtomicUsize::new(0);
        let done = &done;
        let transcription = &self.adapters.transcription;

        let calls: Vec<_> = segments
            .iter()
            .map(|segment| async move {
            let bytes = tokio::fs::read(&segment.path).await?;
            let text = transcription
                .transcribe(bytes, &segment.file_name, &segment.mime_type)
                .await?;

            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            if total > 1 {
                self.progress(
                    ctx,
                    &format!("{}: chunk {}/{}", Stage::Transcribe.label(), finished, total),
                    Self::partial_progress(Stage::Transcribe, finished, total),
                )
                .await;
            }
            Ok::<_, Error>(text)
        })
            .collect();

        let parts: Vec<String> = stream::iter(calls)
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        let text = parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            return Err(Error::Adapter("Transcription returned no text".to_string()));
        }

        self.artifacts.save_transcript(episode.id, &text).await?;
        self.audio.cleanup_segments(&audio).await;

        info!(
            subsystem = "jobs",
            component = "pipeline",
            episode_id = %episode.id,
            chunk_count = total,
            char_count = text.len(),
            "Transcript saved"
        );
        Ok(StageOutcome::Continue)
    }

    async fn embed(&self, episode: &Episode) -> Result<StageOutcome> {
        if self.artifacts.count_slices(episode.id).await? > 0 {
            return Ok(StageOutcome::Continue);
        }

        let transcript = self.transcript_text(episode).await?;
        let texts: Vec<String> = self
            .slicer
            .chunk(&transcript)
            .into_iter()
            .map(|c| c.text)
            .collect();
        if texts.is_empty() {
            return Ok(StageOutcome::Continue);
        }

        let embeddings = self.adapters.embedding.embed_texts(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Adapter(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let slices: Vec<NewVectorSlice> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| NewVectorSlice {
                chunk_index: i as i32,
                text,
                embedding,
            })
            .collect();

        let stored = self.artifacts.insert_slices(episode, &slices).await?;
        debug!(episode_id = %episode.id, chunk_count = stored, "Vector slices stored");
        Ok(StageOutcome::Continue)
    }

    async fn extract_terms(&self, ctx: &JobContext, episode: &Episode) -> Result<StageOutcome> {
        if !self.artifacts.list_terms(episode.id).await?.is_empty() {
            return Ok(StageOutcome::Continue);
        }

        let span = (
            Stage::ExtractTerms.progress_before(),
            Stage::ExtractTerms.progress_after(),
        );
        self.store_new_terms(ctx, episode, span).await?;
        Ok(StageOutcome::Continue)
    }

    /// Extract terms from the transcript and store those the podcast does not
    /// know yet. Progress is spread over `span`. Returns the number stored.
    async fn store_new_terms(
        &self,
        ctx: &JobContext,
        episode: &Episode,
        span: (i32, i32),
    ) -> Result<u64> {
        let transcript = self.transcript_text(episode).await?;
        let existing = self
            .artifacts
            .term_names_for_podcast(episode.podcast_id)
            .await?;

        let chunks = self.extractor.chunks(&transcript);
        let total = chunks.len();
        let mut extracted = Vec::new();

        for chunk in &chunks {
            self.progress(
                ctx,
                &format!(
                    "{} (chunk {}/{})",
                    Stage::ExtractTerms.label(),
                    chunk.index + 1,
                    total
                ),
                Self::span_progress(span, chunk.index, total),
            )
            .await;

            extracted.extend(
                self.extractor
                    .extract_chunk(chunk, &existing, &episode.title)
                    .await?,
            );
        }

        let ranked = rank_terms(extracted, self.extractor.max_terms());
        if ranked.is_empty() {
            info!(episode_id = %episode.id, "No new terms extracted");
            return Ok(0);
        }

        let names: Vec<String> = ranked.iter().map(|t| t.term.clone()).collect();
        let embeddings = self.adapters.embedding.embed_texts(&names).await?;

        let mut embeddings = embeddings.into_iter();
        let terms: Vec<NewTerm> = ranked
            .into_iter()
            .map(|term| NewTerm {
                term,
                embedding: embeddings.next(),
            })
            .collect();

        let inserted = self.artifacts.insert_terms(episode, &terms).await?;
        info!(
            subsystem = "jobs",
            component = "pipeline",
            episode_id = %episode.id,
            chunk_count = total,
            inserted,
            "Terms stored"
        );
        Ok(inserted)
    }

    async fn summarize(&self, episode: &Episode) -> Result<StageOutcome> {
        if self.artifacts.get_summary(episode.id).await?.is_some() {
            return Ok(StageOutcome::Continue);
        }

        let transcript = self.transcript_text(episode).await?;
        let summary = self.summarizer.summarize(&transcript).await?;
        self.artifacts.save_summary(episode.id, &summary).await?;
        Ok(StageOutcome::Continue)
    }

    async fn summary_audio(&self, episode: &Episode) -> Result<StageOutcome> {
        if !self.config.tts_enabled {
            debug!(episode_id = %episode.id, "Speech synthesis disabled");
            return Ok(StageOutcome::Continue);
        }

        let Some(summary) = self.artifacts.get_summary(episode.id).await? else {
            return Ok(StageOutcome::Continue);
        };
        if summary.audio_path.is_some() {
            return Ok(StageOutcome::Continue);
        }

        let dir = episode_dir(self.config.upload_dir(), episode);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(SUMMARY_AUDIO_FILE);

        let on_disk = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !on_disk {
            let audio = self.adapters.speech.synthesize(&summary.text).await?;
            tokio::fs::write(&path, &audio).await?;
        }

        self.artifacts
            .set_summary_audio(episode.id, &path.to_string_lossy())
            .await?;
        Ok(StageOutcome::Continue)
    }
}

#[async_trait]
impl JobHandler for EpisodePipeline {
    fn name(&self) -> &str {
        "episode_pipeline"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.progress(&ctx, STEP_STARTING, 0).await;

        let episode = match self.artifacts.get_episode(ctx.episode_id()).await {
            Ok(Some(episode)) => episode,
            Ok(None) => return JobResult::failed(Error::EpisodeNotFound(ctx.episode_id()).to_string()),
            Err(e) => return JobResult::failed(format!("Failed to load episode: {}", e)),
        };

        let (label, verb, _) = notice_labels(ctx.job.kind);
        self.notify(
            &ctx,
            NotificationKind::JobStarted,
            NotificationLevel::Info,
            format!("{} Started", label),
            format!("Started {}: {}", verb, episode.title),
        )
        .await;

        let title = episode.title.clone();
        let result = match ctx.job.kind {
            JobKind::Process => self.run_pipeline(&ctx, episode).await,
            JobKind::ExtractTerms => self.run_term_extraction(&ctx, &episode).await,
        };

        self.notify_finished(&ctx, &title, &result).await;
        result
    }
}

impl EpisodePipeline {
    /// Every stage of [`Stage::ORDER`].
    async fn run_pipeline(&self, ctx: &JobContext, mut episode: Episode) -> JobResult {
        let job_id = ctx.job_id();
        let started = Instant::now();

        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            episode_id = %episode.id,
            title = %episode.title,
            "Processing episode"
        );

        for stage in Stage::ORDER {
            if self.cancel_requested(ctx).await {
                return self.stop_cancelled(ctx, stage).await;
            }

            self.progress(ctx, stage.label(), stage.progress_before()).await;
            let stage_start = Instant::now();

            let outcome = heartbeat_while(
                self.jobs.as_ref(),
                job_id,
                self.config.heartbeat_interval,
                self.run_stage(stage, ctx, &mut episode),
            )
            .await;

            match outcome {
                Ok(StageOutcome::Continue) => {
                    self.progress(ctx, stage.label(), stage.progress_after()).await;
                    debug!(
                        job_id = %job_id,
                        stage = %stage,
                        duration_ms = stage_start.elapsed().as_millis() as u64,
                        "Stage finished"
                    );
                }
                Ok(StageOutcome::Finished(step)) => return JobResult::Success { step },
                Err(Error::Cancelled) => return self.stop_cancelled(ctx, stage).await,
                Err(e) => return self.stage_failed(ctx, &episode, stage, e),
            }
        }

        // A cancel that arrived during the last stage is honoured too.
        if self.cancel_requested(ctx).await {
            return self
                .stop_cancelled(ctx, Stage::ORDER[Stage::ORDER.len() - 1])
                .await;
        }

        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %job_id,
            episode_id = %episode.id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Episode processed"
        );
        JobResult::completed()
    }

    /// Add terms the podcast does not know yet, from the stored transcript.
    ///
    /// Unlike the full-run stage this never skips because the episode
    /// already has terms.
    async fn run_term_extraction(&self, ctx: &JobContext, episode: &Episode) -> JobResult {
        let stage = Stage::ExtractTerms;
        if self.cancel_requested(ctx).await {
            return self.stop_cancelled(ctx, stage).await;
        }

        info!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %ctx.job_id(),
            episode_id = %episode.id,
            "Extracting new terms"
        );
        self.progress(ctx, stage.label(), 0).await;

        let outcome = heartbeat_while(
            self.jobs.as_ref(),
            ctx.job_id(),
            self.config.heartbeat_interval,
            self.store_new_terms(ctx, episode, (0, Stage::SummaryAudio.progress_after())),
        )
        .await;

        match outcome {
            Ok(inserted) => {
                if self.cancel_requested(ctx).await {
                    return self.stop_cancelled(ctx, stage).await;
                }
                JobResult::Success {
                    step: format!("Completed: {} new terms", inserted),
                }
            }
            Err(Error::Cancelled) => self.stop_cancelled(ctx, stage).await,
            Err(e) => self.stage_failed(ctx, episode, stage, e),
        }
    }

    fn stage_failed(&self, ctx: &JobContext, episode: &Episode, stage: Stage, e: Error) -> JobResult {
        error!(
            subsystem = "jobs",
            component = "pipeline",
            job_id = %ctx.job_id(),
            episode_id = %episode.id,
            stage = %stage,
            error = %e,
            "Stage failed"
        );
        JobResult::Failed {
            stage: Some(stage),
            message: format!("{} failed: {}", stage.label(), e),
        }
    }
}
