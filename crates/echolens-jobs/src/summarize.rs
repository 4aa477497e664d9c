//! Transcript summarisation.
//!
//! Transcripts that fit one chunk get a single prompt. Longer ones are
//! summarised chunk by chunk, the partial summaries joined in order and
//! condensed by a final combine call.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use echolens_core::defaults::{ADAPTER_CONCURRENCY, SUMMARY_JOIN_SEPARATOR, SUMMARY_TEMPERATURE};
use echolens_core::{ChatBackend, ChatOptions, ChunkerConfig, Error, Result, TokenChunker, Tokenizer};

use crate::prompts::{PromptLibrary, SUMMARY_CHUNK, SUMMARY_COMBINE, SUMMARY_SINGLE_PASS};

pub struct Summarizer {
    chat: Arc<dyn ChatBackend>,
    prompts: Arc<PromptLibrary>,
    tokenizer: Arc<dyn Tokenizer>,
    chunker: TokenChunker<Arc<dyn Tokenizer>>,
    concurrency: usize,
}

impl Summarizer {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        prompts: Arc<PromptLibrary>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            chat,
            prompts,
            chunker: TokenChunker::new(ChunkerConfig::summary(), tokenizer.clone()),
            tokenizer,
            concurrency: ADAPTER_CONCURRENCY,
        }
    }

    pub fn with_chunker_config(mut self, config: ChunkerConfig) -> Self {
        self.chunker = TokenChunker::new(config, self.tokenizer.clone());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Summarise a transcript.
    #[instrument(skip(self, transcript), fields(subsystem = "jobs", component = "summarizer", op = "summarize", input_len = transcript.len()))]
    pub async fn summarize(&self, transcript: &str) -> Result<String> {
        if transcript.trim().is_empty() {
            return Err(Error::InvalidInput("Transcript is empty".to_string()));
        }

        let start = Instant::now();

        if self.chunker.is_single_chunk(transcript) {
            let prompt = self.prompts.render(SUMMARY_SINGLE_PASS, &[("text", transcript)])?;
            let summary = self.complete(&prompt).await?;
            debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                "Single-pass summary generated"
            );
            return Ok(summary);
        }

        let chunks = self.chunker.chunk(transcript);
        let total = chunks.len().to_string();

        let calls: Vec<_> = chunks
            .iter()
            .map(|chunk| {
            let chunk_num = (chunk.index + 1).to_string();
            let total = total.as_str();
            async move {
                let prompt = self.prompts.render(
                    SUMMARY_CHUNK,
                    &[
                        ("chunk_num", chunk_num.as_str()),
                        ("total_chunks", total),
                        ("text", chunk.text.as_str()),
                    ],
                )?;
                self.complete(&prompt).await
            }
        })
            .collect();

        let partials: Vec<String> = stream::iter(calls)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let combined = partials.join(SUMMARY_JOIN_SEPARATOR);
        let prompt = self.prompts.render(SUMMARY_COMBINE, &[("combined", combined.as_str())])?;
        let summary = self.complete(&prompt).await?;

        info!(
            chunk_count = chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chunked summary generated"
        );
        Ok(summary)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let options = ChatOptions::with_temperature(SUMMARY_TEMPERATURE);
        let text = self.chat.complete(prompt, &options).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Adapter("Model returned an empty summary".to_string()));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echolens_core::WordTokenizer;
    use echolens_inference::mock::{MockChatBackend, MockFailure};

    fn summarizer(chat: Arc<MockChatBackend>, max_tokens: usize) -> Summarizer {
        Summarizer::new(chat, Arc::new(PromptLibrary::defaults()), Arc::new(WordTokenizer))
            .with_chunker_config(ChunkerConfig::new(max_tokens, 0))
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[tokio::test]
    async fn test_short_transcript_single_pass() {
        let chat = Arc::new(MockChatBackend::new().with_default_response("Short summary."));
        let summary = summarizer(chat.clone(), 100).summarize(&words(20)).await.unwrap();

        assert_eq!(summary, "Short summary.");
        assert_eq!(chat.call_count(), 1);
        assert_eq!(chat.calls_containing("Summarize the following podcast transcript"), 1);
    }

    #[tokio::test]
    async fn test_long_transcript_chunks_then_combines() {
        let chat = Arc::new(
            MockChatBackend::new()
                .with_rule("Part summaries:", "Combined summary.")
                .with_rule("part 1 of 3", "First part.")
                .with_rule("part 2 of 3", "Second part.")
                .with_rule("part 3 of 3", "Third part."),
        );
        let summary = summarizer(chat.clone(), 10).summarize(&words(30)).await.unwrap();

        assert_eq!(summary, "Combined summary.");
        assert_eq!(chat.call_count(), 4);

        let combine = chat
            .calls()
            .into_iter()
            .find(|c| c.input.contains("Part summaries:"))
            .unwrap();
        assert!(combine
            .input
            .contains("First part.\n\nSecond part.\n\nThird part."));
    }

    #[tokio::test]
    async fn test_both_paths_non_empty() {
        let chat = Arc::new(MockChatBackend::new());
        let short = summarizer(chat.clone(), 1000).summarize(&words(50)).await.unwrap();
        let long = summarizer(chat, 10).summarize(&words(50)).await.unwrap();
        assert!(!short.is_empty());
        assert!(!long.is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_output_is_error() {
        let chat = Arc::new(MockChatBackend::new().with_default_response("   "));
        let err = summarizer(chat, 100).summarize("hello world").await.unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let chat = Arc::new(MockChatBackend::new());
        let err = summarizer(chat.clone(), 100).summarize("  ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chunk_failure_propagates() {
        let chat = Arc::new(MockChatBackend::new().with_failure("part 2 of", MockFailure::Auth));
        let err = summarizer(chat, 10).summarize(&words(30)).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
