//! # echolens-inference
//!
//! External service adapters for the EchoLens pipeline.
//!
//! This crate provides:
//! - OpenAI-compatible chat completion and embeddings ([`OpenAIBackend`])
//! - Whisper speech-to-text ([`WhisperBackend`])
//! - Text-to-speech ([`OpenAISpeechBackend`])
//! - Per-capability configuration ([`InferenceConfig`])
//! - Bounded exponential backoff for transient failures ([`RetryPolicy`])
//!
//! # Feature Flags
//!
//! - `mock`: deterministic mock backends for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use echolens_core::EmbeddingBackend;
//! use echolens_inference::{Adapters, InferenceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = InferenceConfig::load().unwrap();
//!     let adapters = Adapters::from_config(&config).unwrap();
//!     let texts = vec!["Hello".to_string()];
//!     let embeddings = adapters.embedding.embed_texts(&texts).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use echolens_core::{ChatBackend, EmbeddingBackend, Result, SpeechBackend, TranscriptionBackend};

pub mod config;
pub mod openai;
pub mod retry;
pub mod speech;
pub mod transcription;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{ConfigError, ConfigResult, InferenceConfig, ServiceConfig};
pub use openai::OpenAIBackend;
pub use retry::RetryPolicy;
pub use speech::OpenAISpeechBackend;
pub use transcription::WhisperBackend;

/// One handle per external capability, shared by the pipeline.
#[derive(Clone)]
pub struct Adapters {
    pub chat: Arc<dyn ChatBackend>,
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub speech: Arc<dyn SpeechBackend>,
}

impl Adapters {
    /// Build the OpenAI-compatible adapters described by `config`.
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        let openai = Arc::new(OpenAIBackend::from_config(config)?);

        Ok(Self {
            chat: openai.clone(),
            embedding: openai,
            transcription: Arc::new(WhisperBackend::from_config(config)?),
            speech: Arc::new(OpenAISpeechBackend::from_config(config)?),
        })
    }
}
