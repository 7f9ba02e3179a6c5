//! Common types for the card-agent crate.

use serde::{Deserialize, Serialize};

/// Cost information for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCost {
    /// Number of generator calls (drafts and repairs)
    pub generator_calls: u32,
    /// Number of draft attempts started
    pub draft_attempts: u32,
    /// Number of input tokens processed
    pub input_tokens: u32,
    /// Number of output tokens generated
    pub output_tokens: u32,
    /// Total processing time in milliseconds
    pub processing_time_ms: u64,
}

impl GenerationCost {
    /// Record one generator call.
    pub fn record_call(&mut self, usage: &crate::backend::traits::Usage) {
        self.generator_calls += 1;
        self.input_tokens += usage.prompt_tokens;
        self.output_tokens += usage.completion_tokens;
    }
}
