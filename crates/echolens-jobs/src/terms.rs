//! Glossary term extraction.
//!
//! Per chunk, one call lists candidate term names and one call per name asks
//! for a definition. Results across chunks are merged case-insensitively and
//! ranked by how often a term came up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use echolens_core::defaults::{
    ADAPTER_CONCURRENCY, TERM_DEFINITION_CONTEXT_CHARS, TERM_EXISTING_PROMPT_LIMIT,
    TERM_MAX_PER_EPISODE, TERM_TEMPERATURE,
};
use echolens_core::{
    ChatBackend, ChatOptions, Chunk, ChunkerConfig, ExtractedTerm, Result, TokenChunker, Tokenizer,
};

use crate::prompts::{PromptLibrary, TERM_EXTRACT_NAMES, TERM_GET_DEFINITION};

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("valid regex"));

/// Body of the first fenced code block, or the trimmed input if there is none.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => text.trim(),
    }
}

/// Parse a JSON array of term names. `None` if the response is not one.
pub fn parse_term_names(response: &str) -> Option<Vec<String>> {
    let names: Vec<serde_json::Value> = serde_json::from_str(strip_code_fences(response)).ok()?;
    Some(
        names
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Parse a definition object. Definitions without an explanation are dropped.
pub fn parse_definition(response: &str, requested: &str) -> Option<ExtractedTerm> {
    let mut value: serde_json::Value = serde_json::from_str(strip_code_fences(response)).ok()?;
    let obj = value.as_object_mut()?;
    let named = obj
        .get("term")
        .and_then(|t| t.as_str())
        .map(|t| !t.trim().is_empty())
        .unwrap_or(false);
    if !named {
        obj.insert(
            "term".to_string(),
            serde_json::Value::String(requested.to_string()),
        );
    }

    let mut term: ExtractedTerm = serde_json::from_value(value).ok()?;
    term.term = term.term.trim().to_string();

    let explanation = term.explanation.as_deref().map(str::trim).unwrap_or("");
    if explanation.is_empty() {
        return None;
    }
    term.explanation = Some(explanation.to_string());
    term.context = term
        .context
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    Some(term)
}

fn merge_into(target: &mut ExtractedTerm, other: &ExtractedTerm) {
    if target.context.is_none() {
        target.context = other.context.clone();
    }
    if target.explanation.is_none() {
        target.explanation = other.explanation.clone();
    }
    for category in &other.categories {
        let lower = category.to_lowercase();
        if !target.categories.iter().any(|c| c.to_lowercase() == lower) {
            target.categories.push(category.clone());
        }
    }
}

/// Merge terms by trimmed, case-insensitive name. The first occurrence keeps
/// its name, context and explanation; missing fields are filled from later
/// occurrences and categories are unioned in order. Idempotent.
pub fn merge_terms(terms: impl IntoIterator<Item = ExtractedTerm>) -> Vec<ExtractedTerm> {
    let mut merged: Vec<ExtractedTerm> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for mut term in terms {
        let key = term.key();
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(&i) => merge_into(&mut merged[i], &term),
            None => {
                term.term = term.term.trim().to_string();
                let categories = std::mem::take(&mut term.categories);
                merge_into(
                    &mut term,
                    &ExtractedTerm {
                        categories,
                        ..Default::default()
                    },
                );
                index.insert(key, merged.len());
                merged.push(term);
            }
        }
    }

    merged
}

fn frequency_score(frequency: usize) -> usize {
    match frequency {
        0 | 1 => 1,
        2..=4 => frequency * 2,
        _ => frequency,
    }
}

/// Merge and rank terms by how many chunks produced them, keeping at most
/// `limit`. Terms seen two to four times rank above rarer and very common
/// ones; ties are broken by name.
pub fn rank_terms(terms: Vec<ExtractedTerm>, limit: usize) -> Vec<ExtractedTerm> {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for term in &terms {
        *frequency.entry(term.key()).or_default() += 1;
    }

    let mut scored: Vec<(usize, ExtractedTerm)> = merge_terms(terms)
        .into_iter()
        .map(|t| (frequency_score(frequency.get(&t.key()).copied().unwrap_or(1)), t))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.term.cmp(&b.term)));
    scored.into_iter().take(limit).map(|(_, t)| t).collect()
}

/// Two-step term extraction over transcript chunks.
pub struct TermExtractor {
    chat: Arc<dyn ChatBackend>,
    prompts: Arc<PromptLibrary>,
    tokenizer: Arc<dyn Tokenizer>,
    chunker: TokenChunker<Arc<dyn Tokenizer>>,
    concurrency: usize,
    max_terms: usize,
}

impl TermExtractor {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        prompts: Arc<PromptLibrary>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            chat,
            prompts,
            chunker: TokenChunker::new(ChunkerConfig::terms(), tokenizer.clone()),
            tokenizer,
            concurrency: ADAPTER_CONCURRENCY,
            max_terms: TERM_MAX_PER_EPISODE,
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

    pub fn max_terms(&self) -> usize {
        self.max_terms
    }

    pub fn chunks(&self, transcript: &str) -> Vec<Chunk> {
        self.chunker.chunk(transcript)
    }

    /// Extract defined terms from one chunk.
    ///
    /// Names in `existing` (case-insensitive) are skipped. An unparseable
    /// names response yields no terms; adapter errors propagate.
    #[instrument(skip_all, fields(subsystem = "jobs", component = "terms", op = "extract_chunk", chunk = chunk.index))]
    pub async fn extract_chunk(
        &self,
        chunk: &Chunk,
        existing: &[String],
        episode_title: &str,
    ) -> Result<Vec<ExtractedTerm>> {
        let existing_terms_str = if existing.is_empty() {
            String::new()
        } else {
            let listed: Vec<&str> = existing
                .iter()
                .take(TERM_EXISTING_PROMPT_LIMIT)
                .map(String::as_str)
                .collect();
            format!(
                "\n\nALREADY EXTRACTED TERMS (do not repeat these):\n{}",
                listed.join(", ")
            )
        };
        let episode_context = if episode_title.trim().is_empty() {
            String::new()
        } else {
            format!(
                "\n\nEPISODE CONTEXT: From '{}'. Do not extract the main subject/guest.",
                episode_title.trim()
            )
        };

        let prompt = self.prompts.render(
            TERM_EXTRACT_NAMES,
            &[
                ("existing_terms_str", existing_terms_str.as_str()),
                ("episode_context", episode_context.as_str()),
                ("chunk", chunk.text.as_str()),
            ],
        )?;

        let response = self.complete(&prompt).await?;
        let names = match parse_term_names(&response) {
            Some(names) => names,
            None => {
                warn!(
                    chunk = chunk.index,
                    response_len = response.len(),
                    "Unparseable term list, no terms for this chunk"
                );
                return Ok(Vec::new());
            }
        };

        let known: HashSet<String> = existing.iter().map(|t| t.trim().to_lowercase()).collect();
        let mut seen = HashSet::new();
        let names: Vec<String> = names
            .into_iter()
            .filter(|n| {
                let key = n.to_lowercase();
                !known.contains(&key) && seen.insert(key)
            })
            .collect();

        debug!(candidates = names.len(), "Term names extracted");

        let context = truncate_chars(&chunk.text, TERM_DEFINITION_CONTEXT_CHARS);
        let lookups: Vec<_> = names.iter().map(|name| self.define(name, context)).collect();
        let results: Vec<Result<Option<ExtractedTerm>>> = stream::iter(lookups)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut terms = Vec::new();
        for result in results {
            if let Some(term) = result? {
                trace!(term = %term.term, "Term defined");
                terms.push(term);
            }
        }
        Ok(terms)
    }

    async fn define(&self, name: &str, context: &str) -> Result<Option<ExtractedTerm>> {
        let prompt = self
            .prompts
            .render(TERM_GET_DEFINITION, &[("term", name), ("chunk", context)])?;
        let response = self.complete(&prompt).await?;

        let term = parse_definition(&response, name);
        if term.is_none() {
            debug!(term = %name, "Definition dropped");
        }
        Ok(term)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat
            .complete(prompt, &ChatOptions::with_temperature(TERM_TEMPERATURE))
            .await
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
