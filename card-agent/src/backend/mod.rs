//! LLM Backend abstraction layer.
//!
//! Provides a trait-based interface over text generators:
//! - OpenAI-compatible HTTP services (vLLM, Ollama, OpenAI, etc.)
//! - Scripted mock backend for testing
//!
//! [`MeteredBackend`] wraps any of them to count calls and tokens.

pub mod metered;
pub mod mock;
pub mod openai;
pub mod traits;

pub use metered::{CallMeter, MeteredBackend};
pub use mock::{ScriptedBackend, ScriptedReply};
pub use openai::OpenAiBackend;
pub use traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};
