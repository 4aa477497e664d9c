//! Token counting for chunk sizing.
//!
//! Chunk limits are expressed in tokens because provider context windows are.
//! Production code uses tiktoken's `cl100k_base`, which matches the OpenAI
//! chat and embedding models the pipeline talks to.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};

/// Trait for tokenization operations.
///
/// Implementations must be thread-safe; one tokenizer is shared by all jobs.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Get the name/identifier of this tokenizer.
    fn name(&self) -> &str;
}

static CL100K: Lazy<std::result::Result<Arc<CoreBPE>, String>> =
    Lazy::new(|| tiktoken_rs::cl100k_base().map(Arc::new).map_err(|e| e.to_string()));

/// Tiktoken-based tokenizer implementation.
#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer for the encoding used by `model` (e.g. "gpt-4o-mini").
    pub fn new(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| Error::Internal(format!("Failed to initialize tokenizer: {}", e)))?;

        Ok(Self {
            bpe: Arc::new(bpe),
            name: model.to_string(),
        })
    }

    /// Shared `cl100k_base` tokenizer, built once per process.
    pub fn cl100k() -> Result<Self> {
        let bpe = CL100K
            .as_ref()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;

        Ok(Self {
            bpe: bpe.clone(),
            name: "cl100k_base".to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Arc<T> {
    fn count_tokens(&self, text: &str) -> usize {
        (**self).count_tokens(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Counts whitespace-separated words as tokens.
///
/// Deterministic and dependency free; useful where exact BPE counts do not
/// matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn name(&self) -> &str {
        "words"
    }
}
