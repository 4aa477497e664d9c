//! HTTP-level tests for the OpenAI-compatible adapters against a mock server.

use std::time::Duration;

use echolens_core::{
    defaults, ChatBackend, ChatOptions, EmbeddingBackend, Error, SpeechBackend,
    TranscriptionBackend,
};
use echolens_inference::{
    OpenAIBackend, OpenAISpeechBackend, RetryPolicy, ServiceConfig, WhisperBackend,
};
use wiremock::matchers::{body_partial_json, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_backoff(Duration::from_millis(1))
        .with_jitter(false)
}

fn service(server: &MockServer, model: &str) -> ServiceConfig {
    ServiceConfig::new(model)
        .with_api_base(server.uri())
        .with_api_key("test-key")
}

fn backend(server: &MockServer, dimension: usize) -> OpenAIBackend {
    OpenAIBackend::new(
        service(server, "test-gen"),
        service(server, "test-embed"),
        dimension,
        fast_retry(),
    )
    .expect("Failed to create backend")
}

fn chat_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

fn error_body(message: &str, error_type: &str) -> serde_json::Value {
    serde_json::json!({
        "error": { "message": message, "type": error_type, "code": null }
    })
}

#[tokio::test]
async fn test_chat_sends_bearer_and_system_prompt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-gen",
            "temperature": 0.5,
            "messages": [
                { "role": "system", "content": "You are terse." },
                { "role": "user", "content": "Summarize: hi" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("Hi.")))
        .expect(1)
        .mount(&server)
        .await;

    let options = ChatOptions {
        temperature: Some(0.5),
        max_tokens: None,
        system: Some("You are terse.".to_string()),
    };
    let reply = backend(&server, 4)
        .complete("Summarize: hi", &options)
        .await
        .unwrap();

    assert_eq!(reply, "Hi.");
}

#[tokio::test]
async fn test_chat_retries_server_error_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(error_body("boom", "server_error")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = backend(&server, 4)
        .complete("hello", &ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(reply, "recovered");
}

#[tokio::test]
async fn test_chat_retries_rate_limit_until_exhausted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(error_body("slow down", "rate_limit_exceeded")),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = backend(&server, 4)
        .complete("hello", &ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transient(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_chat_does_not_retry_auth_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(error_body("Incorrect API key provided", "invalid_request_error")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server, 4)
        .complete("hello", &ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert!(err.to_string().contains("Incorrect API key"));
}

#[tokio::test]
async fn test_chat_does_not_retry_bad_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(error_body("Invalid messages", "invalid_request_error")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server, 4)
        .complete("hello", &ChatOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_embeddings_batched_and_reordered() {
    let server = MockServer::start().await;

    // Returned out of order; the backend sorts by index.
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(serde_json::json!({ "input": ["a", "b"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                { "embedding": [0.0, 1.0], "index": 1 },
                { "embedding": [1.0, 0.0], "index": 0 }
            ],
            "model": "test-embed"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(serde_json::json!({ "input": ["c"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.5, 0.5], "index": 0 }],
            "model": "test-embed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = backend(&server, 2)
        .with_batch_size(2)
        .embed_texts(&texts)
        .await
        .unwrap();

    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[0].as_slice(), &[1.0, 0.0]);
    assert_eq!(vectors[1].as_slice(), &[0.0, 1.0]);
    assert_eq!(vectors[2].as_slice(), &[0.5, 0.5]);
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_config_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server, 1536)
        .embed_texts(&["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert!(err.to_string().contains("1536"));
}

#[tokio::test]
async fn test_whisper_uploads_multipart_and_trims_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  Welcome to the show.\n"))
        .expect(1)
        .mount(&server)
        .await;

    let whisper = WhisperBackend::new(service(&server, "whisper-1"), fast_retry()).unwrap();
    let text = whisper
        .transcribe(b"fake-mp3".to_vec(), "audio.mp3", "audio/mpeg")
        .await
        .unwrap();
    assert_eq!(text, "Welcome to the show.");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"model\""));
    assert!(body.contains("whisper-1"));
    assert!(body.contains("filename=\"audio.mp3\""));
    assert!(body.contains("response_format"));
}

#[tokio::test]
async fn test_whisper_retries_unavailable_service() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("second try"))
        .expect(1)
        .mount(&server)
        .await;

    let whisper = WhisperBackend::new(service(&server, "whisper-1"), fast_retry()).unwrap();
    let text = whisper
        .transcribe(vec![0u8; 16], "part_000.mp3", "audio/mpeg")
        .await
        .unwrap();
    assert_eq!(text, "second try");
}

#[tokio::test]
async fn test_speech_returns_audio_and_truncates_input() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_partial_json(serde_json::json!({
            "model": "tts-1",
            "voice": "nova",
            "response_format": "mp3"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let speech =
        OpenAISpeechBackend::new(service(&server, "tts-1"), "nova", fast_retry()).unwrap();
    let long_text = "word ".repeat(2_000);
    let audio = speech.synthesize(&long_text).await.unwrap();
    assert_eq!(audio, b"ID3audio");

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let input = sent["input"].as_str().unwrap();
    assert_eq!(input.chars().count(), defaults::TTS_MAX_CHARS);
}
