//! OpenAI-compatible chat and embedding backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

use echolens_core::{
    defaults, ChatBackend, ChatOptions, EmbeddingBackend, Error, Result, Vector,
};

use super::error::error_from_response;
use super::types::*;
use crate::config::{InferenceConfig, ServiceConfig};
use crate::retry::RetryPolicy;

/// Build a client with the connect timeout shared by all adapters.
pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(defaults::DOWNLOAD_CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// POST request to `endpoint` with bearer auth when a key is configured.
pub(crate) fn build_request(
    client: &Client,
    service: &ServiceConfig,
    endpoint: &str,
) -> reqwest::RequestBuilder {
    let mut req = client
        .post(service.url(endpoint))
        .timeout(Duration::from_secs(service.timeout_secs));

    if let Some(ref api_key) = service.api_key {
        req = req.header("Authorization", format!("Bearer {}", api_key));
    }

    req
}

/// OpenAI-compatible backend for chat completion and embeddings.
pub struct OpenAIBackend {
    client: Client,
    chat: ServiceConfig,
    embedding: ServiceConfig,
    embed_dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAIBackend {
    pub fn new(
        chat: ServiceConfig,
        embedding: ServiceConfig,
        embed_dimension: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        info!(
            subsystem = "inference",
            component = "openai",
            chat_url = %chat.api_base,
            chat_model = %chat.model,
            embed_url = %embedding.api_base,
            embed_model = %embedding.model,
            embed_dimension,
            "Initializing OpenAI backend"
        );

        Ok(Self {
            client: http_client()?,
            chat,
            embedding,
            embed_dimension,
            batch_size: defaults::EMBED_BATCH_SIZE,
            retry,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(
            config.chat.clone(),
            config.embedding.clone(),
            config.embedding_dimension,
            config.retry.clone(),
        )
    }

    /// Override the number of texts sent per embeddings request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn send_chat(&self, request: &ChatCompletionRequest) -> Result<String> {
        let response = build_request(&self.client, &self.chat, "/chat/completions")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "chat").await);
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to parse chat response: {}", e)))?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Adapter("Chat response contained no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn send_embeddings(&self, batch: &[String]) -> Result<Vec<Vector>> {
        let request = EmbeddingRequest {
            model: self.embedding.model.clone(),
            input: batch.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = build_request(&self.client, &self.embedding, "/embeddings")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "embedding").await);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to parse embedding response: {}", e)))?;

        if result.data.len() != batch.len() {
            return Err(Error::Adapter(format!(
                "Embedding response has {} vectors for {} inputs",
                result.data.len(),
                batch.len()
            )));
        }

        // Sort by index to ensure correct ordering
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        data.into_iter()
            .map(|d| {
                if d.embedding.len() != self.embed_dimension {
                    return Err(Error::Config(format!(
                        "Model {} returned {} dimensions, expected {}",
                        self.embedding.model,
                        d.embedding.len(),
                        self.embed_dimension
                    )));
                }
                Ok(Vector::from(d.embedding))
            })
            .collect()
    }
}

#[async_trait]
impl ChatBackend for OpenAIBackend {
    #[instrument(skip(self, prompt, options), fields(subsystem = "inference", component = "chat", model = %self.chat.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str, options: &ChatOptions) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = options.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let request = ChatCompletionRequest {
            model: self.chat.model.clone(),
            messages,
            temperature: options.temperature.or(self.chat.temperature),
            max_tokens: options.max_tokens.or(self.chat.max_tokens),
        };

        let this = self;
        let req = &request;
        let content = self
            .retry
            .run("chat", move || this.send_chat(req))
            .await?;

        debug!(
            response_len = content.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion finished"
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.chat.model
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "embedding", model = %self.embedding.model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let this = self;
            let embedded = self
                .retry
                .run("embedding", move || this.send_embeddings(batch))
                .await?;
            vectors.extend(embedded);
        }

        debug!(count = vectors.len(), "Generated embeddings");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.embedding.model
    }
}
