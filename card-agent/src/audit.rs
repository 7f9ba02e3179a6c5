//! Audit trail for card message generations.
//!
//! Every generation leaves an entry with its decision trace: which drafts
//! were produced, which gates they failed, which repairs ran, and how the
//! run ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::request::GenerationRequest;
use crate::response::{GenerationOutcome, GenerationResult, ResultKey};
use crate::types::GenerationCost;

/// Maximum entries in the audit log before pruning.
const MAX_AUDIT_ENTRIES: usize = 10_000;

/// One step in a generation's decision trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A draft was parsed from generator output
    DraftProduced { attempt: u32, words: usize },
    /// The draft call failed or its output was malformed
    DraftFailed { attempt: u32, error: String },
    /// The draft failed the hard gate
    HardGateFailed { attempt: u32, violation: String },
    /// A repair strategy ran
    RepairStep {
        attempt: u32,
        strategy: String,
        error: Option<String>,
    },
    /// The soft gate scored a candidate
    SoftVerdict { attempt: u32, issues: Vec<String> },
    /// The run finished with text
    Accepted { outcome: GenerationOutcome, words: usize },
    /// The run finished without text
    Failed { error: String },
}

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub entry_id: String,
    /// Result key of the card position
    pub key: ResultKey,
    /// Card that was generated for
    pub card_id: String,
    /// Position within the spread
    pub position_id: String,
    /// Decision trace, in order
    pub events: Vec<GenerationEvent>,
    /// How the run ended (if it produced text)
    pub outcome: Option<GenerationOutcome>,
    /// Error message (if it did not)
    pub error: Option<String>,
    /// Generator usage
    pub cost: Option<GenerationCost>,
    /// When the generation started
    pub requested_at: DateTime<Utc>,
    /// When it finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Create an entry from a request.
    pub fn from_request(request: &GenerationRequest, key: &ResultKey) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            card_id: request.card_id.clone(),
            position_id: request.position_id.clone(),
            events: Vec::new(),
            outcome: None,
            error: None,
            cost: None,
            requested_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Duration from start to finish, if finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.requested_at).num_milliseconds().max(0) as u64)
    }
}

/// Audit log for tracking all generations.
pub struct AuditLog {
    /// Log entries (newest first)
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
    /// Maximum entries to retain
    max_entries: usize,
}

impl AuditLog {
    /// Create a new audit log.
    pub fn new() -> Self {
        Self::with_max_entries(MAX_AUDIT_ENTRIES)
    }

    /// Create with custom max entries.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }

    /// Log a generation start.
    pub async fn log_request(&self, request: &GenerationRequest, key: &ResultKey) -> String {
        let entry = AuditEntry::from_request(request, key);
        let entry_id = entry.entry_id.clone();

        let mut entries = self.entries.write().await;
        entries.push_front(entry);

        // Prune if over limit
        while entries.len() > self.max_entries {
            entries.pop_back();
        }

        entry_id
    }

    /// Complete an entry with the returned result.
    pub async fn log_result(
        &self,
        entry_id: &str,
        events: Vec<GenerationEvent>,
        result: &GenerationResult,
    ) {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.iter_mut().find(|e| e.entry_id == entry_id) {
            entry.events = events;
            entry.outcome = Some(result.outcome);
            entry.cost = Some(result.cost.clone());
            entry.completed_at = Some(result.created_at);
        }
    }

    /// Complete an entry with a failure.
    pub async fn log_failure(
        &self,
        entry_id: &str,
        events: Vec<GenerationEvent>,
        error: &str,
        cost: GenerationCost,
    ) {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.iter_mut().find(|e| e.entry_id == entry_id) {
            entry.events = events;
            entry.error = Some(error.to_string());
            entry.cost = Some(cost);
            entry.completed_at = Some(Utc::now());
        }
    }

    /// Get recent entries.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Get entries for a result key, newest first.
    pub async fn get_by_key(&self, key: &ResultKey) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().filter(|e| &e.key == key).cloned().collect()
    }

    /// Get statistics.
    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.read().await;

        let total = entries.len();
        let succeeded = entries.iter().filter(|e| e.outcome.is_some()).count();
        let fallbacks = entries
            .iter()
            .filter(|e| e.outcome.is_some_and(|o| o.is_flagged()))
            .count();
        let failed = entries.iter().filter(|e| e.error.is_some()).count();

        let costs: Vec<&GenerationCost> =
            entries.iter().filter_map(|e| e.cost.as_ref()).collect();
        let avg_generator_calls = if costs.is_empty() {
            0.0
        } else {
            costs.iter().map(|c| c.generator_calls as f64).sum::<f64>() / costs.len() as f64
        };

        AuditStats {
            total_generations: total,
            succeeded,
            fallbacks,
            failed,
            avg_generator_calls,
        }
    }

    /// Clear the log.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Get count.
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    /// Total generations logged
    pub total_generations: usize,
    /// Generations that returned text
    pub succeeded: usize,
    /// Of those, degraded fallbacks
    pub fallbacks: usize,
    /// Generations that returned an error
    pub failed: usize,
    /// Mean generator calls per finished generation
    pub avg_generator_calls: f64,
}
