//! Structured logging schema and field name constants.
//!
//! All crates use these names for structured `tracing` fields so that log
//! aggregation can query the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Job failed or service degraded, requires attention |
//! | WARN  | Recoverable issue: retry, skipped output, orphan reclaimed |
//! | INFO  | Lifecycle events: startup, job start/finish, stage completion |
//! | DEBUG | Decision points, per-chunk progress, config choices |
//! | TRACE | High-volume data (individual terms, slices) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "worker", "pipeline", "openai", "sweeper"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "embed_texts", "transcribe", "sweep_orphans"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Episode UUID being processed.
pub const EPISODE_ID: &str = "episode_id";

/// Podcast UUID owning the episode.
pub const PODCAST_ID: &str = "podcast_id";

/// Pipeline stage name.
pub const STAGE: &str = "stage";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed (chunking, transcription segments).
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for the call.
pub const MODEL: &str = "model";

/// Provider or backend name.
pub const PROVIDER: &str = "provider";
