//! Prompt templates for summarisation and term extraction.
//!
//! Templates use `{{ name }}` placeholders. Built-in defaults can be
//! overridden per key from a YAML map (`key: template`), loaded from the file
//! named by `ECHOLENS_PROMPTS`.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info};

use echolens_core::{Error, Result};

pub const SUMMARY_SINGLE_PASS: &str = "summarization.single_pass";
pub const SUMMARY_CHUNK: &str = "summarization.chunk";
pub const SUMMARY_COMBINE: &str = "summarization.combine_chunks";
pub const TERM_EXTRACT_NAMES: &str = "term_extraction.extract_names";
pub const TERM_GET_DEFINITION: &str = "term_extraction.get_definition";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid regex"));

const DEFAULT_SINGLE_PASS: &str = r#"Summarize the following podcast transcript. Cover the main topics discussed, the key insights and any conclusions or recommendations. Write clear prose paragraphs, not a list of bullet points.

Transcript:
{{ text }}

Summary:"#;

const DEFAULT_CHUNK: &str = r#"This is part {{ chunk_num }} of {{ total_chunks }} of a podcast transcript. Summarize the key points, topics and insights from this part. Keep names, numbers and specific claims.

Transcript part:
{{ text }}

Summary of this part:"#;

const DEFAULT_COMBINE: &str = r#"The following are summaries of consecutive parts of one podcast episode. Combine them into a single coherent summary of the whole episode. Remove repetition, keep the order in which topics came up and write clear prose paragraphs.

Part summaries:
{{ combined }}

Episode summary:"#;

const DEFAULT_EXTRACT_NAMES: &str = r#"Identify technical terms, concepts, acronyms, named methods and domain jargon in this podcast transcript excerpt that a listener might want explained. Skip common words, people's names and generic phrases.{{ existing_terms_str }}{{ episode_context }}

Return ONLY a JSON array of term names, for example: ["term one", "term two"]

Transcript excerpt:
{{ chunk }}"#;

const DEFAULT_GET_DEFINITION: &str = r#"Explain the term "{{ term }}" as it is used in this podcast transcript excerpt.

Transcript excerpt:
{{ chunk }}

Return ONLY a JSON object with these fields:
{"term": "{{ term }}", "context": "one sentence on how the term came up in the episode", "explanation": "two or three sentences explaining the term to a curious listener", "categories": ["one or two short topic labels"]}"#;

/// Named prompt templates.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PromptLibrary {
    /// Built-in templates.
    pub fn defaults() -> Self {
        let templates = [
            (SUMMARY_SINGLE_PASS, DEFAULT_SINGLE_PASS),
            (SUMMARY_CHUNK, DEFAULT_CHUNK),
            (SUMMARY_COMBINE, DEFAULT_COMBINE),
            (TERM_EXTRACT_NAMES, DEFAULT_EXTRACT_NAMES),
            (TERM_GET_DEFINITION, DEFAULT_GET_DEFINITION),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { templates }
    }

    /// Defaults with the templates from a YAML map laid on top.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let overrides: HashMap<String, String> = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid prompt file: {}", e)))?;

        let mut library = Self::defaults();
        for (key, template) in overrides {
            debug!(key = %key, "Prompt override");
            library.templates.insert(key, template);
        }
        Ok(library)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read prompt file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults, or the file named by `ECHOLENS_PROMPTS` when set.
    pub fn load() -> Result<Self> {
        match std::env::var("ECHOLENS_PROMPTS") {
            Ok(path) if !path.trim().is_empty() => {
                info!(path = %path, "Loading prompt overrides");
                Self::from_file(Path::new(path.trim()))
            }
            _ => Ok(Self::defaults()),
        }
    }

    pub fn template(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    /// Render the template `key`. Placeholders without a value render empty.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> Result<String> {
        let template = self
            .template(key)
            .ok_or_else(|| Error::Config(format!("Unknown prompt: {}", key)))?;

        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            vars.iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_default()
        });

        Ok(rendered.into_owned())
    }
}
