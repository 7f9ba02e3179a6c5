//! Hard gate: mechanically checked constraints.
//!
//! Deterministic and total. The same text under the same limits always
//! gets the same verdict. Checks run in a fixed order and stop at the
//! first violation.

use canon::prompt::IMPERATIVE_LEADS;
use canon::Role;
use serde::Deserialize;

use crate::backend::traits::LlmError;
use crate::config::LimitsConfig;
use crate::text::{lead_word, sentence_count, split_sentences, word_count};

/// A hard-gate verdict against a candidate text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintViolation {
    /// Nothing left after trimming
    #[error("Output is empty")]
    EmptyOutput,

    /// Word count outside the hard band
    #[error("Word count {count} outside {min}..={max}")]
    WordCountOutOfRange { count: usize, min: usize, max: usize },

    /// Sentence count differs from the required exact count
    #[error("Expected {expected} sentences, found {actual}")]
    SentenceCountMismatch { expected: usize, actual: usize },

    /// A sentence opens with a coaching verb
    #[error("Sentence begins with imperative \"{word}\"")]
    ImperativeCoachingDetected { word: String },
}

impl ConstraintViolation {
    pub fn is_word_count(&self) -> bool {
        matches!(self, ConstraintViolation::WordCountOutOfRange { .. })
    }
}

/// Why a single draft or repair call did not yield usable text.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DraftError {
    /// Generator unreachable or returned a non-success response
    #[error("Generator call failed: {0}")]
    Transport(#[from] LlmError),

    /// Output was not `{"text": string}` JSON
    #[error("Malformed generator output: {0}")]
    MalformedGeneratorOutput(String),

    /// Output parsed but failed the hard gate
    #[error("Hard constraint failed: {0}")]
    Constraint(#[from] ConstraintViolation),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneratorPayload {
    text: String,
}

/// Strip a single surrounding Markdown code fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    match inner.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => inner.trim(),
    }
}

/// Parse a generator response shaped exactly `{"text": string}`.
pub fn parse_generator_output(raw: &str) -> Result<String, DraftError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(DraftError::MalformedGeneratorOutput(
            "empty response".to_string(),
        ));
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| DraftError::MalformedGeneratorOutput(e.to_string()))?;
    // Structs also deserialize from sequences; only an object is accepted.
    if !value.is_object() {
        return Err(DraftError::MalformedGeneratorOutput(
            "expected a JSON object".to_string(),
        ));
    }

    serde_json::from_value::<GeneratorPayload>(value)
        .map(|payload| payload.text.trim().to_string())
        .map_err(|e| DraftError::MalformedGeneratorOutput(e.to_string()))
}

/// Run the hard gate.
pub fn validate_text(text: &str, role: Role, limits: &LimitsConfig) -> Result<(), ConstraintViolation> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ConstraintViolation::EmptyOutput);
    }

    let count = word_count(trimmed);
    if !limits.in_hard_band(count) {
        return Err(ConstraintViolation::WordCountOutOfRange {
            count,
            min: limits.min_words,
            max: limits.max_words,
        });
    }

    if let Some(expected) = limits.required_sentence_count {
        let actual = sentence_count(trimmed);
        if actual != expected {
            return Err(ConstraintViolation::SentenceCountMismatch { expected, actual });
        }
    }

    if limits.enforce_no_imperatives {
        if let Some(word) = imperative_lead(trimmed) {
            tracing::debug!(role = %role, word = %word, "Imperative sentence start");
            return Err(ConstraintViolation::ImperativeCoachingDetected { word });
        }
    }

    Ok(())
}

/// First sentence-initial imperative verb, if any.
pub fn imperative_lead(text: &str) -> Option<String> {
    split_sentences(text)
        .into_iter()
        .filter_map(lead_word)
        .find(|word| IMPERATIVE_LEADS.contains(&word.as_str()))
}
