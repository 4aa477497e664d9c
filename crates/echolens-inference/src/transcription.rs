//! Whisper speech-to-text over the OpenAI `/audio/transcriptions` endpoint.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use echolens_core::{Error, Result, TranscriptionBackend};

use crate::config::{InferenceConfig, ServiceConfig};
use crate::openai::{build_request, error_from_response, http_client};
use crate::retry::RetryPolicy;

/// OpenAI-compatible Whisper backend.
pub struct WhisperBackend {
    client: Client,
    service: ServiceConfig,
    retry: RetryPolicy,
}

impl WhisperBackend {
    pub fn new(service: ServiceConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            service,
            retry,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(config.transcription.clone(), config.retry.clone())
    }

    async fn send(&self, audio: &[u8], file_name: &str, mime_type: &str) -> Result<String> {
        // Multipart forms are single-use; rebuild per attempt.
        let file_part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| Error::InvalidInput(format!("Invalid audio MIME type: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.service.model.clone())
            .text("response_format", "text");

        let response = build_request(&self.client, &self.service, "/audio/transcriptions")
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "transcription").await);
        }

        let text = response.text().await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    #[instrument(skip(self, audio), fields(subsystem = "inference", component = "transcription", model = %self.service.model, bytes = audio.len()))]
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String> {
        let start = Instant::now();
        let this = self;
        let audio = audio.as_slice();

        let text = self
            .retry
            .run("transcription", move || this.send(audio, file_name, mime_type))
            .await?;

        debug!(
            response_len = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Transcription finished"
        );
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.service.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let backend = WhisperBackend::from_config(&InferenceConfig::default()).unwrap();
        assert_eq!(backend.model_name(), "whisper-1");
    }
}
