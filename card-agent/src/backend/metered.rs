//! Call accounting around any backend.

use async_trait::async_trait;
use std::sync::Mutex;

use super::traits::*;
use crate::types::GenerationCost;

/// Running totals of generator calls for one generation.
#[derive(Debug, Default)]
pub struct CallMeter {
    cost: Mutex<GenerationCost>,
}

impl CallMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, usage: &Usage) {
        self.cost
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record_call(usage);
    }

    /// Calls and tokens recorded so far.
    pub fn snapshot(&self) -> GenerationCost {
        self.cost
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Backend wrapper that records every call on a [`CallMeter`],
/// whether or not the call succeeds.
pub struct MeteredBackend<'a> {
    inner: &'a dyn LlmBackend,
    meter: &'a CallMeter,
}

impl<'a> MeteredBackend<'a> {
    pub fn new(inner: &'a dyn LlmBackend, meter: &'a CallMeter) -> Self {
        Self { inner, meter }
    }
}

#[async_trait]
impl LlmBackend for MeteredBackend<'_> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let result = self.inner.complete(request).await;
        match &result {
            Ok(response) => self.meter.record(&response.usage),
            Err(_) => self.meter.record(&Usage::default()),
        }
        result
    }
}
