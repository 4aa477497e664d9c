//! Adapter configuration.
//!
//! Each external capability (chat, embedding, transcription, speech) gets its
//! own [`ServiceConfig`]. Per-capability base URL and API key fall back to the
//! shared `OPENAI_API_BASE` / `OPENAI_API_KEY`.
//!
//! Configuration can be loaded from:
//! - a TOML file named by `ECHOLENS_CONFIG` (`${VAR}` placeholders are expanded)
//! - environment variables
//!
//! ```toml
//! [inference]
//! api_key = "${OPENAI_API_KEY}"
//! embedding_dimension = 1536
//!
//! [inference.chat]
//! model = "gpt-4o-mini"
//! temperature = 0.7
//!
//! [inference.retry]
//! max_attempts = 3
//! initial_backoff_ms = 500
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use echolens_core::defaults;

use crate::retry::RetryPolicy;

/// Environment variable naming the optional TOML config file.
pub const ENV_CONFIG_FILE: &str = "ECHOLENS_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for echolens_core::Error {
    fn from(e: ConfigError) -> Self {
        echolens_core::Error::Config(e.to_string())
    }
}

/// Connection settings for one external capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_base: defaults::OPENAI_API_BASE.to_string(),
            api_key: None,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            timeout_secs: defaults::ADAPTER_TIMEOUT_SECS,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Join the base URL with an endpoint path.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), endpoint)
    }

    /// Validate the configuration.
    pub fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.api_base.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{} api_base cannot be empty",
                name
            )));
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{} api_base must start with http:// or https://, got: {}",
                name, self.api_base
            )));
        }

        if self.model.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{} model cannot be empty",
                name
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "{} timeout_secs must be positive",
                name
            )));
        }

        Ok(())
    }
}

/// Configuration for every adapter the pipeline uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub chat: ServiceConfig,
    pub embedding: ServiceConfig,
    pub transcription: ServiceConfig,
    pub speech: ServiceConfig,
    pub embedding_dimension: usize,
    pub tts_voice: String,
    pub tts_enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let mut chat = ServiceConfig::new(defaults::CHAT_MODEL);
        chat.temperature = Some(defaults::CHAT_TEMPERATURE);
        chat.max_tokens = Some(defaults::CHAT_MAX_TOKENS);

        Self {
            chat,
            embedding: ServiceConfig::new(defaults::EMBED_MODEL),
            transcription: ServiceConfig::new(defaults::TRANSCRIPTION_MODEL),
            speech: ServiceConfig::new(defaults::TTS_MODEL),
            embedding_dimension: defaults::EMBED_DIMENSION,
            tts_voice: defaults::TTS_VOICE.to_string(),
            tts_enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-capability section of the TOML file; unset fields inherit shared values.
#[derive(Debug, Default, Deserialize)]
struct TomlService {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

impl TomlService {
    fn resolve(self, base: ServiceConfig, shared: &Shared) -> ServiceConfig {
        ServiceConfig {
            api_base: self
                .api_base
                .or_else(|| shared.api_base.clone())
                .unwrap_or(base.api_base),
            api_key: self.api_key.or_else(|| shared.api_key.clone()).or(base.api_key),
            model: self.model.unwrap_or(base.model),
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }
}

struct Shared {
    api_base: Option<String>,
    api_key: Option<String>,
}

impl InferenceConfig {
    /// Load from `ECHOLENS_CONFIG` if set, else from the environment.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) if !path.is_empty() => {
                info!(path = %path, "Loading inference config from file");
                Self::from_file(Path::new(&path))
            }
            _ => {
                debug!("No inference config file set, using environment variables");
                let config = Self::from_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML content, expanding `${VAR}` placeholders first.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);

        #[derive(Deserialize)]
        struct TomlRoot {
            inference: TomlInference,
        }

        #[derive(Deserialize)]
        struct TomlInference {
            api_base: Option<String>,
            api_key: Option<String>,
            #[serde(default)]
            chat: TomlService,
            #[serde(default)]
            embedding: TomlService,
            #[serde(default)]
            transcription: TomlService,
            #[serde(default)]
            speech: TomlService,
            embedding_dimension: Option<usize>,
            tts_voice: Option<String>,
            tts_enabled: Option<bool>,
            #[serde(default)]
            retry: RetryPolicy,
        }

        let root: TomlRoot = toml::from_str(&content)?;
        let inf = root.inference;
        let base = Self::default();
        let shared = Shared {
            api_base: inf.api_base,
            api_key: inf.api_key,
        };

        let config = Self {
            chat: inf.chat.resolve(base.chat, &shared),
            embedding: inf.embedding.resolve(base.embedding, &shared),
            transcription: inf.transcription.resolve(base.transcription, &shared),
            speech: inf.speech.resolve(base.speech, &shared),
            embedding_dimension: inf.embedding_dimension.unwrap_or(base.embedding_dimension),
            tts_voice: inf.tts_voice.unwrap_or(base.tts_voice),
            tts_enabled: inf.tts_enabled.unwrap_or(base.tts_enabled),
            retry: inf.retry,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let base = Self::default();
        let shared_base = get("OPENAI_API_BASE");
        let shared_key = get("OPENAI_API_KEY");

        let service = |prefix: &str, mut config: ServiceConfig, model_var: &str| {
            if let Some(model) = get(model_var) {
                config.model = model;
            }
            if let Some(api_base) = get(&format!("{prefix}_API_BASE")).or(shared_base.clone()) {
                config.api_base = api_base;
            }
            config.api_key = get(&format!("{prefix}_API_KEY")).or(shared_key.clone());
            if let Some(t) = get(&format!("{prefix}_TEMPERATURE")).and_then(|v| v.parse().ok()) {
                config.temperature = Some(t);
            }
            if let Some(n) = get(&format!("{prefix}_MAX_TOKENS")).and_then(|v| v.parse().ok()) {
                config.max_tokens = Some(n);
            }
            if let Some(s) = get(&format!("{prefix}_TIMEOUT_SECS")).and_then(|v| v.parse().ok()) {
                config.timeout_secs = s;
            }
            config
        };

        Self {
            chat: service("CHAT", base.chat, "CHAT_MODEL"),
            embedding: service("EMBEDDING", base.embedding, "EMBEDDING_MODEL"),
            transcription: service("TRANSCRIPTION", base.transcription, "TRANSCRIPTION_MODEL"),
            speech: service("TTS", base.speech, "TTS_MODEL"),
            embedding_dimension: get("EMBEDDING_DIMENSION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.embedding_dimension),
            tts_voice: get("TTS_VOICE").unwrap_or(base.tts_voice),
            tts_enabled: get("TTS_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(base.tts_enabled),
            retry: base.retry,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chat.validate("chat")?;
        self.embedding.validate("embedding")?;
        self.transcription.validate("transcription")?;
        self.speech.validate("speech")?;

        if self.embedding_dimension == 0 {
            return Err(ConfigError::Validation(
                "embedding_dimension must be positive".to_string(),
            ));
        }

        if self.tts_enabled && self.tts_voice.is_empty() {
            return Err(ConfigError::Validation(
                "tts_voice cannot be empty when TTS is enabled".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Capabilities without an API key, in alphabetical order.
    pub fn missing_api_keys(&self) -> Vec<&'static str> {
        let mut missing: Vec<_> = [
            ("chat", &self.chat),
            ("embedding", &self.embedding),
            ("transcription", &self.transcription),
            ("speech", &self.speech),
        ]
        .into_iter()
        .filter(|(_, s)| s.api_key.is_none())
        .map(|(name, _)| name)
        .collect();
        missing.sort_unstable();
        missing
    }

    fn substitute_env_vars(content: &str) -> String {
        let Ok(re) = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
            return content.to_string();
        };
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }
}
