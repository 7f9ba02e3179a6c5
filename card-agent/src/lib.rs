//! Card Agent - card message generation
//!
//! Turns one drawn card in one spread position into a short reflective
//! passage, using an LLM as an untrusted text generator:
//! - Trait-based LLM backends (OpenAI-compatible HTTP, scripted mock)
//! - Hard gate for mechanically checkable constraints
//! - Soft gate for anchor coverage and tone
//! - Ordered repair strategies with re-validation after every step
//! - Audit trail of every decision taken for a generation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          CardMessageService             │
//! │   (draft / validate / repair loop)      │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┼───────────────┐
//!      ▼           ▼               ▼
//! ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │ LlmBackend  │ │ Canon       │ │ Gates and   │
//! │ (OpenAI/    │ │ (roles,     │ │ repairs     │
//! │  scripted)  │ │  anchors)   │ │             │
//! └─────────────┘ └─────────────┘ └─────────────┘
//! ```

pub mod audit;
pub mod backend;
pub mod config;
pub mod quality;
pub mod repair;
pub mod request;
pub mod response;
pub mod service;
pub mod text;
pub mod types;
pub mod validate;

#[cfg(test)]
mod fixtures;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditLog, AuditStats, GenerationEvent};
pub use backend::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};
pub use backend::{OpenAiBackend, ScriptedBackend, ScriptedReply};
pub use config::{BudgetConfig, ConfigError, GenerationConfig, LimitsConfig, SamplingConfig};
pub use quality::{QualityIssue, QualityVerdict};
pub use repair::{FullRewrite, LocalPadding, MicroRepair, RepairChain, RepairStrategy};
pub use request::GenerationRequest;
pub use response::{GenerationOutcome, GenerationResult, ResultKey};
pub use service::{CardMessageService, GenerationError};
pub use types::*;
pub use validate::{ConstraintViolation, DraftError};
