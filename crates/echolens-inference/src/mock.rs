//! Deterministic mock backends for testing.
//!
//! Every adapter trait has a mock here. Mocks log their calls, can be told
//! to fail with a transient or fatal error, and never touch the network.
//!
//! ## Usage
//!
//! ```rust
//! use echolens_core::{ChatBackend, ChatOptions};
//! use echolens_inference::mock::MockChatBackend;
//!
//! #[tokio::test]
//! async fn test_with_mock_chat() {
//!     let chat = MockChatBackend::new()
//!         .with_rule("Summarize", "A short summary.")
//!         .with_default_response("[]");
//!
//!     let reply = chat.complete("Summarize this", &ChatOptions::default()).await.unwrap();
//!     assert_eq!(reply, "A short summary.");
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use echolens_core::{
    ChatBackend, ChatOptions, EmbeddingBackend, Error, Result, SpeechBackend,
    TranscriptionBackend, Vector,
};

/// Kind of error a mock returns when told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable provider failure (network, 5xx).
    Transient,
    /// Rejected credentials.
    Auth,
    /// Non-retryable 4xx rejection.
    InvalidInput,
}

impl MockFailure {
    fn into_error(self, operation: &str) -> Error {
        match self {
            MockFailure::Transient => {
                Error::Transient(format!("{}: simulated server error (HTTP 503)", operation))
            }
            MockFailure::Auth => Error::Config(format!(
                "{}: simulated authentication failure (HTTP 401)",
                operation
            )),
            MockFailure::InvalidInput => {
                Error::InvalidInput(format!("{}: simulated bad request (HTTP 400)", operation))
            }
        }
    }
}

/// One recorded mock call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
    pub timestamp: Instant,
}

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<MockCall>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: &str, input: &str) {
        self.lock().push(MockCall {
            operation: operation.to_string(),
            input: input.to_string(),
            timestamp: Instant::now(),
        });
    }

    fn snapshot(&self) -> Vec<MockCall> {
        self.lock().clone()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

// =============================================================================
// CHAT
// =============================================================================

/// Mock chat backend answering by prompt substring.
#[derive(Clone)]
pub struct MockChatBackend {
    rules: Vec<(String, String)>,
    failures: Vec<(String, MockFailure)>,
    default_response: String,
    latency: Option<Duration>,
    calls: CallLog,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            failures: Vec::new(),
            default_response: "Mock response".to_string(),
            latency: None,
            calls: CallLog::default(),
        }
    }

    /// Reply with `response` to prompts containing `needle`. Rules are
    /// checked in insertion order.
    pub fn with_rule(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    /// Fail prompts containing `needle`. Failures win over rules.
    pub fn with_failure(mut self, needle: impl Into<String>, failure: MockFailure) -> Self {
        self.failures.push((needle.into(), failure));
        self
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency = Some(Duration::from_millis(latency_ms));
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Number of prompts seen that contain `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.input.contains(needle))
            .count()
    }
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn complete(&self, prompt: &str, _options: &ChatOptions) -> Result<String> {
        self.calls.record("chat", prompt);
        simulate_latency(self.latency).await;

        if let Some((_, failure)) = self.failures.iter().find(|(n, _)| prompt.contains(n)) {
            return Err(failure.into_error("chat"));
        }

        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

// =============================================================================
// EMBEDDING
// =============================================================================

/// Deterministic embeddings: the same text always maps to the same unit vector.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }

        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if mag_a > 0.0 && mag_b > 0.0 {
            dot / (mag_a * mag_b)
        } else {
            0.0
        }
    }
}

/// Mock embedding backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    failure: Option<MockFailure>,
    calls: CallLog,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failure: None,
            calls: CallLog::default(),
        }
    }

    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Number of `embed_texts` calls.
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.record("embed", &texts.join("\n"));

        if let Some(failure) = self.failure {
            return Err(failure.into_error("embedding"));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(MockEmbeddingGenerator::generate(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Mock speech-to-text backend returning a fixed transcript per call.
#[derive(Clone)]
pub struct MockTranscriptionBackend {
    transcript: String,
    failure: Option<MockFailure>,
    hook: Option<Hook>,
    calls: CallLog,
}

impl MockTranscriptionBackend {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            failure: None,
            hook: None,
            calls: CallLog::default(),
        }
    }

    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Run `hook` with the file name on every call, before replying.
    pub fn with_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// File names of every transcribed upload, in call order.
    pub fn file_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.input.clone()).collect()
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriptionBackend {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        file_name: &str,
        _mime_type: &str,
    ) -> Result<String> {
        self.calls.record("transcribe", file_name);
        if let Some(ref hook) = self.hook {
            hook(file_name);
        }

        if let Some(failure) = self.failure {
            return Err(failure.into_error("transcription"));
        }
        Ok(self.transcript.clone())
    }

    fn model_name(&self) -> &str {
        "mock-whisper"
    }
}

// =============================================================================
// SPEECH
// =============================================================================

/// Mock text-to-speech backend returning fixed bytes.
#[derive(Clone)]
pub struct MockSpeechBackend {
    audio: Vec<u8>,
    failure: Option<MockFailure>,
    hook: Option<Hook>,
    calls: CallLog,
}

impl MockSpeechBackend {
    pub fn new() -> Self {
        Self {
            audio: b"ID3mock-mp3".to_vec(),
            failure: None,
            hook: None,
            calls: CallLog::default(),
        }
    }

    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Run `hook` with the input text on every call, before replying.
    pub fn with_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }
}

impl Default for MockSpeechBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechBackend for MockSpeechBackend {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.record("speech", text);
        if let Some(ref hook) = self.hook {
            hook(text);
        }

        if let Some(failure) = self.failure {
            return Err(failure.into_error("speech"));
        }
        Ok(self.audio.clone())
    }

    fn model_name(&self) -> &str {
        "mock-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chat_rules_in_order() {
        let chat = MockChatBackend::new()
            .with_rule("names", r#"["Rust"]"#)
            .with_rule("summary", "short")
            .with_default_response("fallback");

        let opts = ChatOptions::default();
        assert_eq!(chat.complete("list names", &opts).await.unwrap(), r#"["Rust"]"#);
        assert_eq!(chat.complete("write a summary", &opts).await.unwrap(), "short");
        assert_eq!(chat.complete("other", &opts).await.unwrap(), "fallback");
        assert_eq!(chat.call_count(), 3);
        assert_eq!(chat.calls_containing("summary"), 1);
    }

    #[tokio::test]
    async fn test_chat_failure_wins_over_rule() {
        let chat = MockChatBackend::new()
            .with_rule("summary", "short")
            .with_failure("summary", MockFailure::Auth);

        let err = chat
            .complete("write a summary", &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_normalized() {
        let backend = MockEmbeddingBackend::new(64);
        let texts = vec!["hello world".to_string(), "hello world".to_string()];
        let vectors = backend.embed_texts(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].as_slice(), vectors[1].as_slice());
        assert_eq!(vectors[0].as_slice().len(), 64);

        let magnitude: f32 = vectors[0].as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = MockEmbeddingGenerator::generate("podcast", 32);
        let sim = MockEmbeddingGenerator::cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_transcription_hook_and_file_names() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let backend = MockTranscriptionBackend::new("hello")
            .with_hook(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        backend.transcribe(vec![1, 2], "a.mp3", "audio/mpeg").await.unwrap();
        backend.transcribe(vec![3], "b.mp3", "audio/mpeg").await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(backend.file_names(), vec!["a.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retryable() {
        let backend = MockSpeechBackend::new().with_failure(MockFailure::Transient);
        let err = backend.synthesize("hi").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
