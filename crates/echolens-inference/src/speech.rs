//! Text-to-speech over the OpenAI `/audio/speech` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use echolens_core::{defaults, Result, SpeechBackend};

use crate::config::{InferenceConfig, ServiceConfig};
use crate::openai::{build_request, error_from_response, http_client, SpeechRequest};
use crate::retry::RetryPolicy;

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// OpenAI-compatible speech synthesis backend producing mp3.
pub struct OpenAISpeechBackend {
    client: Client,
    service: ServiceConfig,
    voice: String,
    retry: RetryPolicy,
}

impl OpenAISpeechBackend {
    pub fn new(service: ServiceConfig, voice: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            service,
            voice: voice.into(),
            retry,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(
            config.speech.clone(),
            config.tts_voice.clone(),
            config.retry.clone(),
        )
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    async fn send(&self, request: &SpeechRequest) -> Result<Vec<u8>> {
        let response = build_request(&self.client, &self.service, "/audio/speech")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "speech").await);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for OpenAISpeechBackend {
    #[instrument(skip(self, text), fields(subsystem = "inference", component = "speech", model = %self.service.model, voice = %self.voice))]
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let input = truncate_chars(text, defaults::TTS_MAX_CHARS);
        if input.len() < text.len() {
            warn!(
                original_chars = text.chars().count(),
                max_chars = defaults::TTS_MAX_CHARS,
                "Truncating text for speech synthesis"
            );
        }

        let request = SpeechRequest {
            model: self.service.model.clone(),
            input: input.to_string(),
            voice: self.voice.clone(),
            response_format: "mp3".to_string(),
        };

        let this = self;
        let req = &request;
        let audio = self.retry.run("speech", move || this.send(req)).await?;

        debug!(bytes = audio.len(), "Speech synthesis finished");
        Ok(audio)
    }

    fn model_name(&self) -> &str {
        &self.service.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_ascii() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let text = "日本語のテキスト";
        let cut = truncate_chars(text, 3);
        assert_eq!(cut, "日本語");
        assert_eq!(truncate_chars(text, 100), text);
    }

    #[test]
    fn test_from_default_config() {
        let backend = OpenAISpeechBackend::from_config(&InferenceConfig::default()).unwrap();
        assert_eq!(backend.model_name(), "tts-1");
        assert_eq!(backend.voice(), "alloy");
    }
}
