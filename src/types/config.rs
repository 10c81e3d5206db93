//! Configuration types for the enhancement service.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{RetryPolicy, RotationStrategy};
use crate::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_SUMMARY_GROUP_SIZE, DEFAULT_TARGET_WORDS,
    MIN_SUMMARY_GROUP_SIZE, MIN_TARGET_WORDS,
};

/// Default instructions sent alongside every chunk.
pub const DEFAULT_INSTRUCTIONS: &str = "Rewrite the following passage so it reads naturally \
and fluently. Fix grammar and awkward machine-translated phrasing, keep every plot detail, \
name and line of dialogue, and keep the paragraph structure and any HTML tags intact. \
Return only the rewritten passage.";

/// Default instructions for range summaries.
pub const DEFAULT_SUMMARY_INSTRUCTIONS: &str = "Summarize the following passage in a few \
short paragraphs. Mention the important events and characters. Return only the summary.";

/// Global service configuration.
///
/// Loaded in layers: built-in defaults, then an optional `enhancer.toml`
/// in the working directory, then `ENHANCER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    /// Target chunk size in words
    pub target_words: usize,

    /// Chunks per summary group
    pub summary_group_size: usize,

    /// API keys in rotation order
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// How the credential pool rotates
    pub rotation: RotationStrategy,

    /// Model name passed to the completion API
    pub model: String,

    /// Base URL of the completion API
    pub api_base_url: String,

    /// Instructions sent with every chunk
    pub instructions: String,

    /// Instructions sent with range summaries
    pub summary_instructions: String,

    /// Directory for the persistent chunk cache; in-memory when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// HTTP port of the service
    pub port: u16,

    /// Attempts per credential on transient failures
    pub max_attempts: u32,

    /// Base backoff between transient retries, in milliseconds
    pub backoff_ms: u64,

    /// Per-request timeout of the completion API client
    pub request_timeout_secs: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            target_words: DEFAULT_TARGET_WORDS,
            summary_group_size: DEFAULT_SUMMARY_GROUP_SIZE,
            api_keys: Vec::new(),
            rotation: RotationStrategy::Failover,
            model: "gemini-1.5-flash".to_string(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            summary_instructions: DEFAULT_SUMMARY_INSTRUCTIONS.to_string(),
            cache_dir: None,
            port: 3017,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: 1000,
            request_timeout_secs: 120,
        }
    }
}

impl EnhancerConfig {
    /// Load configuration from `enhancer.toml` and `ENHANCER_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("target_words", defaults.target_words as i64)?
            .set_default("summary_group_size", defaults.summary_group_size as i64)?
            .set_default("api_keys", Vec::<String>::new())?
            .set_default("rotation", "failover")?
            .set_default("model", defaults.model)?
            .set_default("api_base_url", defaults.api_base_url)?
            .set_default("instructions", defaults.instructions)?
            .set_default("summary_instructions", defaults.summary_instructions)?
            .set_default("port", defaults.port as i64)?
            .set_default("max_attempts", defaults.max_attempts as i64)?
            .set_default("backoff_ms", defaults.backoff_ms as i64)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .add_source(config::File::with_name("enhancer").required(false))
            .add_source(
                config::Environment::with_prefix("ENHANCER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api_keys"),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        Ok(loaded.normalized())
    }

    /// Clamp sizes to their documented minimums and drop blank keys.
    pub fn normalized(mut self) -> Self {
        self.target_words = self.target_words.max(MIN_TARGET_WORDS);
        self.summary_group_size = self.summary_group_size.max(MIN_SUMMARY_GROUP_SIZE);
        self.max_attempts = self.max_attempts.max(1);
        self.api_keys = self
            .api_keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Default per-run options derived from this configuration.
    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            target_words: self.target_words,
            instructions: self.instructions.clone(),
            model: self.model.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            max_delay: Duration::from_millis(self.backoff_ms.saturating_mul(8)),
        }
    }
}

/// Options for one `process` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Target chunk size in words
    pub target_words: usize,

    /// Instructions sent with every chunk
    pub instructions: String,

    /// Model name passed to the completion API
    pub model: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        EnhancerConfig::default().process_options()
    }
}

impl ProcessOptions {
    /// Apply per-request overrides.
    pub fn with_overrides(mut self, overrides: &ProcessOverrides) -> Self {
        if let Some(target) = overrides.target_words {
            self.target_words = target.max(MIN_TARGET_WORDS);
        }
        if let Some(instructions) = &overrides.instructions {
            self.instructions = instructions.clone();
        }
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        self
    }
}

/// Per-request overrides of [`ProcessOptions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_words: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
