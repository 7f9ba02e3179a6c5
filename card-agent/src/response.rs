//! Card message result types.

use canon::join_identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::GenerationRequest;
use crate::types::GenerationCost;

/// Stable identifier of a generated card message.
///
/// Determined only by spread, position, intention id, card, and
/// orientation; never by the intention text or the generated prose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultKey(String);

impl ResultKey {
    const PREFIX: &'static str = "card-message:";

    /// Derive the key for a request.
    pub fn for_request(request: &GenerationRequest) -> Self {
        let identity = join_identity(&[
            request.spread_id.as_str(),
            request.position_id.as_str(),
            request.intention_id.as_str(),
            request.card_id.as_str(),
            request.orientation().as_str(),
        ]);

        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self(format!("{}{}", Self::PREFIX, &digest[..32]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the returned text was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// First draft passed both gates
    Clean,
    /// Length repair fixed a word-count failure with full coverage
    LengthRepaired,
    /// A rewrite round produced a clean accept
    SoftRepaired,
    /// Rewrite rounds ran out; accepted because coverage is complete
    CoverageAccepted,
    /// Draft attempts ran out; best hard-gate-valid text returned
    Fallback { within_target: bool },
}

impl GenerationOutcome {
    /// Whether callers should treat the text as a degraded result.
    pub fn is_flagged(&self) -> bool {
        matches!(self, GenerationOutcome::Fallback { .. })
    }
}

/// The generated message for one card position.
///
/// Produced once per successful generation and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Stable key for this card position
    pub key: ResultKey,
    /// Final text
    pub text: String,
    /// When the result was created
    pub created_at: DateTime<Utc>,
    /// Path that produced the text
    pub outcome: GenerationOutcome,
    /// Generator usage
    pub cost: GenerationCost,
}

impl GenerationResult {
    /// Create a result stamped with the current time.
    pub fn new(
        key: ResultKey,
        text: impl Into<String>,
        outcome: GenerationOutcome,
        cost: GenerationCost,
    ) -> Self {
        Self {
            key,
            text: text.into(),
            created_at: Utc::now(),
            outcome,
            cost,
        }
    }
}
