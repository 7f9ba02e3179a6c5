//! Configuration for card message generation.
//!
//! All tunables live here and are handed to the service at construction,
//! so tests can run the pipeline with alternate bands and budgets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use canon::PromptBands;

/// Error for inconsistent configuration.
#[derive(Debug, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Configuration for the card message service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Text limits for the hard and soft gates
    pub limits: LimitsConfig,
    /// Attempt and repair budgets
    pub budget: BudgetConfig,
    /// Generator sampling settings
    pub sampling: SamplingConfig,
    /// Record every generation in the audit log
    pub audit_enabled: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            budget: BudgetConfig::default(),
            sampling: SamplingConfig::default(),
            audit_enabled: true,
        }
    }
}

impl GenerationConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check that bands and budgets are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;

        if l.min_words == 0 || l.min_words > l.max_words {
            return Err(ConfigError(format!(
                "word band {}..={} is empty",
                l.min_words, l.max_words
            )));
        }
        if l.target_min_words > l.target_max_words
            || l.target_min_words < l.min_words
            || l.target_max_words > l.max_words
        {
            return Err(ConfigError(format!(
                "target band {}..={} must sit inside hard band {}..={}",
                l.target_min_words, l.target_max_words, l.min_words, l.max_words
            )));
        }
        if l.min_sentences == 0 || l.min_sentences > l.max_sentences {
            return Err(ConfigError(format!(
                "sentence band {}..={} is empty",
                l.min_sentences, l.max_sentences
            )));
        }
        if l.required_sentence_count == Some(0) {
            return Err(ConfigError("required sentence count must be positive".to_string()));
        }
        if self.budget.draft_attempts == 0 {
            return Err(ConfigError("at least one draft attempt is required".to_string()));
        }

        Ok(())
    }

    /// Bands encoded into prompts.
    pub fn prompt_bands(&self) -> PromptBands {
        PromptBands {
            min_words: self.limits.min_words,
            max_words: self.limits.max_words,
            min_sentences: self.limits.min_sentences,
            max_sentences: self.limits.max_sentences,
            required_sentences: self.limits.required_sentence_count,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_words: 75,
            max_words: 140,
            target_min_words: 85,
            target_max_words: 125,
            required_sentence_count: None,
            min_sentences: 4,
            max_sentences: 7,
            enforce_no_imperatives: true,
            discouraged_hit_limit: 2,
            enforce_future_conditional: true,
        }
    }
}

/// Hard and soft text limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Hard minimum word count
    pub min_words: usize,
    /// Hard maximum word count
    pub max_words: usize,
    /// Soft target minimum (inside the hard band)
    pub target_min_words: usize,
    /// Soft target maximum (inside the hard band)
    pub target_max_words: usize,
    /// Exact sentence count enforced by the hard gate, if any
    pub required_sentence_count: Option<usize>,
    /// Soft minimum sentence count
    pub min_sentences: usize,
    /// Soft maximum sentence count
    pub max_sentences: usize,
    /// Reject sentences that open with a coaching verb
    pub enforce_no_imperatives: bool,
    /// Discouraged-phrase hits at or above this mark need repair
    pub discouraged_hit_limit: usize,
    /// Future positions need exactly one "If" sentence
    pub enforce_future_conditional: bool,
}

impl LimitsConfig {
    pub fn in_target_band(&self, words: usize) -> bool {
        (self.target_min_words..=self.target_max_words).contains(&words)
    }

    pub fn in_hard_band(&self, words: usize) -> bool {
        (self.min_words..=self.max_words).contains(&words)
    }

    pub fn in_sentence_band(&self, sentences: usize) -> bool {
        (self.min_sentences..=self.max_sentences).contains(&sentences)
    }
}

/// Attempt and repair budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Top-level draft attempts
    pub draft_attempts: u32,
    /// Rewrite rounds per draft that fails the soft gate
    pub soft_repair_rounds: u32,
    /// Wall-clock ceiling for one generation (ms)
    pub request_timeout_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            draft_attempts: 3,
            soft_repair_rounds: 2,
            request_timeout_ms: 120_000,
        }
    }
}

impl BudgetConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Generator sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Temperature for fresh drafts
    pub draft_temperature: f32,
    /// Temperature for full rewrites
    pub rewrite_temperature: f32,
    /// Temperature for length micro-repairs
    pub micro_repair_temperature: f32,
    /// Output-length budget per call
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            draft_temperature: 0.8,
            rewrite_temperature: 0.3,
            micro_repair_temperature: 0.2,
            max_output_tokens: 600,
        }
    }
}
