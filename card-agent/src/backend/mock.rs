//! Scripted LLM backend for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::traits::*;

/// One scripted outcome of a `complete` call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this raw content
    Text(String),
    /// Fail with this error
    Error(LlmError),
}

impl ScriptedReply {
    /// Reply with `{"text": ...}` JSON.
    pub fn json_text(text: &str) -> Self {
        ScriptedReply::Text(serde_json::json!({ "text": text }).to_string())
    }
}

/// Mock backend that replays a fixed script of replies in order.
///
/// Every request is recorded so tests can assert which prompts the
/// pipeline sent and in what order. Once the script runs out, the
/// fallback reply (if any) is repeated; otherwise calls fail.
pub struct ScriptedBackend {
    model_id: String,
    available: AtomicBool,
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicU32,
}

impl ScriptedBackend {
    /// Create a new backend with an empty script.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Append a reply to the script.
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        lock(&self.script).push_back(reply);
        self
    }

    /// Append a raw text reply.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.with_reply(ScriptedReply::Text(content.into()))
    }

    /// Append a `{"text": ...}` reply.
    pub fn with_text(self, text: &str) -> Self {
        self.with_reply(ScriptedReply::json_text(text))
    }

    /// Append an error reply.
    pub fn with_error(self, error: LlmError) -> Self {
        self.with_reply(ScriptedReply::Error(error))
    }

    /// Reply used once the script is exhausted.
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Get the number of times complete was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("Mock backend disabled".to_string()));
        }

        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum::<u32>()
            + request
                .system_prompt
                .as_ref()
                .map(|s| s.len() as u32 / 4)
                .unwrap_or(0);

        lock(&self.requests).push(request);

        let reply = lock(&self.script).pop_front().or_else(|| self.fallback.clone());

        match reply {
            Some(ScriptedReply::Text(content)) => {
                let mut response = CompletionResponse::stop(content);
                response.usage.prompt_tokens = prompt_tokens;
                Ok(response)
            }
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(LlmError::Unavailable("Script exhausted".to_string())),
        }
    }
}
