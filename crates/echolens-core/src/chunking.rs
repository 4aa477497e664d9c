//! Token-bounded transcript chunking.
//!
//! Transcripts are split on whitespace into words, then packed greedily into
//! chunks of at most `max_tokens` tokens. Consecutive chunks may share up to
//! `overlap_tokens` tokens of trailing context. Chunks keep their byte offsets
//! into the original text and are returned in document order.
//!
//! Token counts are the sum of per-word counts, which for BPE tokenizers is a
//! close upper estimate of the joined text's count.
//!
//! # Example
//!
//! ```rust
//! use echolens_core::chunking::{ChunkerConfig, TokenChunker};
//! use echolens_core::tokenizer::WordTokenizer;
//!
//! let chunker = TokenChunker::new(ChunkerConfig::new(4, 1), WordTokenizer);
//! let chunks = chunker.chunk("one two three four five six seven");
//! assert_eq!(chunks[0].text, "one two three four");
//! assert_eq!(chunks[1].text, "four five six seven");
//! ```

use crate::defaults;
use crate::error::{Error, Result};
use crate::tokenizer::Tokenizer;

/// Configuration for token-bounded chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,
    /// Tokens of trailing context repeated at the start of the next chunk.
    pub overlap_tokens: usize,
}

impl ChunkerConfig {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
        }
    }

    /// Chunks for map-reduce summarisation.
    pub fn summary() -> Self {
        Self::new(defaults::SUMMARY_CHUNK_TOKENS, 0)
    }

    /// Chunks for term extraction.
    pub fn terms() -> Self {
        Self::new(
            defaults::TERM_CHUNK_TOKENS,
            defaults::TERM_CHUNK_OVERLAP_TOKENS,
        )
    }

    /// Chunks stored as vector slices.
    pub fn slices() -> Self {
        Self::new(
            defaults::SLICE_CHUNK_TOKENS,
            defaults::SLICE_CHUNK_OVERLAP_TOKENS,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::Config("max_tokens must be positive".to_string()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(Error::Config(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// A slice of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    pub text: String,
    /// Starting byte offset in the original text.
    pub start_offset: usize,
    /// Ending byte offset (exclusive) in the original text.
    pub end_offset: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
    tokens: usize,
}

/// Greedy token-bounded chunker over word boundaries.
pub struct TokenChunker<T: Tokenizer> {
    config: ChunkerConfig,
    tokenizer: T,
}

impl<T: Tokenizer> TokenChunker<T> {
    /// Create a chunker. An overlap that is not smaller than `max_tokens` is
    /// clamped to `max_tokens - 1`.
    pub fn new(config: ChunkerConfig, tokenizer: T) -> Self {
        let max_tokens = config.max_tokens.max(1);
        let overlap_tokens = config.overlap_tokens.min(max_tokens - 1);
        Self {
            config: ChunkerConfig {
                max_tokens,
                overlap_tokens,
            },
            tokenizer,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Token count of the whole text, using the same measure as `chunk`.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.words(text).iter().map(|w| w.tokens).sum()
    }

    /// Whether the text fits into a single chunk.
    pub fn is_single_chunk(&self, text: &str) -> bool {
        self.count_tokens(text) <= self.config.max_tokens
    }

    fn words(&self, text: &str) -> Vec<Word> {
        let mut words = Vec::new();
        let mut start: Option<usize> = None;

        for (pos, ch) in text.char_indices() {
            match (ch.is_whitespace(), start) {
                (true, Some(s)) => {
                    words.push(self.word(text, s, pos));
                    start = None;
                }
                (false, None) => start = Some(pos),
                _ => {}
            }
        }
        if let Some(s) = start {
            words.push(self.word(text, s, text.len()));
        }

        words
    }

    fn word(&self, text: &str, start: usize, end: usize) -> Word {
        Word {
            start,
            end,
            tokens: self.tokenizer.count_tokens(&text[start..end]).max(1),
        }
    }

    /// Split `text` into ordered chunks. Whitespace-only text yields none.
    ///
    /// A single word longer than `max_tokens` becomes a chunk on its own.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let words = self.words(text);
        let mut chunks = Vec::new();
        let mut i = 0;

        while i < words.len() {
            let mut j = i;
            let mut tokens = 0;
            while j < words.len() && (j == i || tokens + words[j].tokens <= self.config.max_tokens)
            {
                tokens += words[j].tokens;
                j += 1;
            }

            let start = words[i].start;
            let end = words[j - 1].end;
            chunks.push(Chunk {
                index: chunks.len(),
                text: text[start..end].to_string(),
                start_offset: start,
                end_offset: end,
                token_count: tokens,
            });

            if j == words.len() {
                break;
            }

            // Step back over trailing words for overlap, always advancing past `i`.
            // The overlap leaves room for word `j`, so every chunk adds new text.
            let room = self.config.max_tokens.saturating_sub(words[j].tokens);
            let budget = self.config.overlap_tokens.min(room);
            let mut k = j;
            let mut overlap = 0;
            while k > i + 1 && overlap + words[k - 1].tokens <= budget {
                overlap += words[k - 1].tokens;
                k -= 1;
            }
            i = k;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{TiktokenTokenizer, WordTokenizer};

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_and_whitespace_yield_no_chunks() {
        let chunker = TokenChunker::new(ChunkerConfig::new(10, 2), WordTokenizer);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t ").is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = TokenChunker::new(ChunkerConfig::new(10, 2), WordTokenizer);
        let text = "  hello there world  ";
        assert!(chunker.is_single_chunk(text));

        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello there world");
        assert_eq!(chunks[0].start_offset, 2);
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn test_chunks_respect_token_bound() {
        let chunker = TokenChunker::new(ChunkerConfig::new(7, 2), WordTokenizer);
        let text = words(50);
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 7);
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.text);
        }
    }

    #[test]
    fn test_chunks_are_ordered_and_cover_text() {
        let chunker = TokenChunker::new(ChunkerConfig::new(5, 2), WordTokenizer);
        let text = words(23);
        let chunks = chunker.chunk(&text);

        for (i, pair) in chunks.windows(2).enumerate() {
            assert_eq!(pair[0].index, i);
            assert!(pair[1].start_offset > pair[0].start_offset);
            // Overlap or adjacency, never a gap.
            assert!(pair[1].start_offset <= pair[0].end_offset + 1);
        }
        assert_eq!(chunks.first().unwrap().start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
    }

    #[test]
    fn test_overlap_repeats_trailing_words() {
        let chunker = TokenChunker::new(ChunkerConfig::new(4, 2), WordTokenizer);
        let chunks = chunker.chunk("a b c d e f g h");
        assert_eq!(chunks[0].text, "a b c d");
        assert_eq!(chunks[1].text, "c d e f");
        assert_eq!(chunks[2].text, "e f g h");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_zero_overlap_partitions_text() {
        let chunker = TokenChunker::new(ChunkerConfig::new(3, 0), WordTokenizer);
        let chunks = chunker.chunk("a b c d e f g");
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c", "d e f", "g"]);
    }

    #[test]
    fn test_oversized_overlap_is_clamped_and_terminates() {
        let chunker = TokenChunker::new(ChunkerConfig::new(3, 10), WordTokenizer);
        assert_eq!(chunker.config().overlap_tokens, 2);
        let chunks = chunker.chunk(&words(12));
        assert_eq!(chunks.last().unwrap().text, "w9 w10 w11");
    }

    /// One token per byte, so a long word can exceed the chunk bound.
    struct ByteTokenizer;

    impl Tokenizer for ByteTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            text.len()
        }

        fn name(&self) -> &str {
            "bytes"
        }
    }

    #[test]
    fn test_oversized_word_never_yields_overlap_only_chunk() {
        let chunker = TokenChunker::new(ChunkerConfig::new(4, 2), ByteTokenizer);
        let text = "a b c d supercalifragilistic e f";
        let chunks = chunker.chunk(text);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d", "supercalifragilistic", "e f"]);

        // Every chunk ends past the previous one.
        for pair in chunks.windows(2) {
            assert!(pair[1].end_offset > pair[0].end_offset);
        }
    }

    #[test]
    fn test_overlap_shrinks_to_fit_next_word() {
        let chunker = TokenChunker::new(ChunkerConfig::new(4, 2), ByteTokenizer);
        let chunks = chunker.chunk("a b c d eee f");
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d", "d eee", "f"]);
    }

    #[test]
    fn test_unicode_offsets_are_char_boundaries() {
        let chunker = TokenChunker::new(ChunkerConfig::new(2, 0), WordTokenizer);
        let text = "café naïve résumé 日本語 テキスト";
        for chunk in chunker.chunk(text) {
            assert!(text.is_char_boundary(chunk.start_offset));
            assert!(text.is_char_boundary(chunk.end_offset));
        }
    }

    #[test]
    fn test_tiktoken_bound() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let chunker = TokenChunker::new(ChunkerConfig::new(40, 8), tokenizer);
        let text = "The speaker explains how vector databases index embeddings. ".repeat(30);
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 40);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::new(10, 2).validate().is_ok());
        assert!(ChunkerConfig::new(0, 0).validate().is_err());
        assert!(ChunkerConfig::new(5, 5).validate().is_err());
        assert!(ChunkerConfig::summary().validate().is_ok());
        assert!(ChunkerConfig::terms().validate().is_ok());
        assert!(ChunkerConfig::slices().validate().is_ok());
    }
}
