//! Centralized default constants for the EchoLens pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; environment variables and config files override them at runtime.

// =============================================================================
// CHUNKING
// =============================================================================

/// Tokens per summarisation chunk (~80k characters of English speech).
pub const SUMMARY_CHUNK_TOKENS: usize = 20_000;

/// Tokens per term-extraction chunk (~10k characters).
pub const TERM_CHUNK_TOKENS: usize = 2_500;

/// Overlap between term-extraction chunks so names on a boundary are seen whole.
pub const TERM_CHUNK_OVERLAP_TOKENS: usize = 125;

/// Tokens per vector slice (~1000 characters).
pub const SLICE_CHUNK_TOKENS: usize = 250;

/// Overlap between adjacent vector slices.
pub const SLICE_CHUNK_OVERLAP_TOKENS: usize = 50;

/// Maximum characters of chunk text passed to a single term-definition prompt.
pub const TERM_DEFINITION_CONTEXT_CHARS: usize = 5_000;

/// Maximum number of existing term names injected into an extraction prompt.
pub const TERM_EXISTING_PROMPT_LIMIT: usize = 100;

/// Maximum terms kept per episode after ranking.
pub const TERM_MAX_PER_EPISODE: usize = 20;

/// Separator between per-chunk summaries before the combine call.
pub const SUMMARY_JOIN_SEPARATOR: &str = "\n\n";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Default chat/completion model.
pub const CHAT_MODEL: &str = "gpt-4o-mini";

/// Default chat temperature for free-form calls.
pub const CHAT_TEMPERATURE: f32 = 0.7;

/// Default completion token limit.
pub const CHAT_MAX_TOKENS: u32 = 2_000;

/// Temperature used for summarisation prompts.
pub const SUMMARY_TEMPERATURE: f32 = 0.5;

/// Temperature used for term extraction prompts.
pub const TERM_TEMPERATURE: f32 = 0.3;

/// Default embedding model.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Maximum inputs per embeddings request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Default speech-to-text model.
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Default text-to-speech model.
pub const TTS_MODEL: &str = "tts-1";

/// Default text-to-speech voice.
pub const TTS_VOICE: &str = "alloy";

/// Speech endpoint input limit in characters.
pub const TTS_MAX_CHARS: usize = 4_096;

/// HTTP request timeout for adapter calls.
pub const ADAPTER_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// RETRY
// =============================================================================

/// Attempts per adapter call (first try included).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 500;

/// Upper bound for a single backoff delay.
pub const RETRY_MAX_BACKOFF_MS: u64 = 8_000;

/// Backoff growth factor between attempts.
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

// =============================================================================
// AUDIO
// =============================================================================

/// Root directory for downloaded audio and synthesised summaries.
pub const UPLOAD_DIR: &str = "./echolens_data/uploads";

/// Transcription endpoint upload limit; larger files are split.
pub const TRANSCRIPTION_MAX_FILE_BYTES: u64 = 25 * 1024 * 1024;

/// Target size of each split audio segment.
pub const AUDIO_SEGMENT_TARGET_BYTES: u64 = 20 * 1024 * 1024;

/// Shortest allowed audio segment.
pub const AUDIO_SEGMENT_MIN_SECS: u64 = 5 * 60;

/// Longest allowed audio segment.
pub const AUDIO_SEGMENT_MAX_SECS: u64 = 20 * 60;

/// Concurrent requests for chunked transcription and term definitions.
pub const ADAPTER_CONCURRENCY: usize = 5;

/// Download connect timeout.
pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-download timeout.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// File name of the synthesised summary inside the episode directory.
pub const SUMMARY_AUDIO_FILE: &str = "summary.mp3";

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Polling interval when the queue is idle (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Maximum jobs in flight per worker.
pub const JOB_MAX_CONCURRENT: usize = 2;

/// Wall-clock limit for one pipeline run.
pub const JOB_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Interval between orphan sweeps.
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// An in-progress job with no update for this long is considered orphaned.
pub const ORPHAN_TIMEOUT_SECS: u64 = 30 * 60;

/// How often a running job touches `updated_at` while a stage is busy.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Error message recorded on orphaned jobs.
pub const ORPHAN_ERROR_MESSAGE: &str = "Task was interrupted or orphaned (worker restart/crash)";

/// Number of terminal jobs returned by the task overview.
pub const RECENT_JOB_LIMIT: i64 = 20;

/// Log lines returned for a single job.
pub const JOB_LOG_LIMIT: i64 = 200;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PAGINATION / SEARCH
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;

/// Default number of slices returned by semantic search.
pub const SEARCH_LIMIT: i64 = 10;
