//! Card message request types.

use canon::{anchor_seed, Orientation};
use serde::{Deserialize, Serialize};

/// Request to generate the message for one card position.
///
/// Fully specified by the caller and immutable for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Spread the card belongs to
    pub spread_id: String,
    /// Position within the spread (encodes the role, e.g. "past-1")
    pub position_id: String,
    /// Intention identifier
    pub intention_id: String,
    /// The querent's intention, verbatim
    pub intention_text: String,
    /// Card identity used for canon lookup
    pub card_id: String,
    /// Display name of the card
    pub card_name: String,
    /// Whether the card was drawn reversed
    #[serde(default)]
    pub reversed: bool,
}

impl GenerationRequest {
    /// Create a new upright request.
    pub fn new(
        spread_id: impl Into<String>,
        position_id: impl Into<String>,
        intention_id: impl Into<String>,
        intention_text: impl Into<String>,
        card_id: impl Into<String>,
        card_name: impl Into<String>,
    ) -> Self {
        Self {
            spread_id: spread_id.into(),
            position_id: position_id.into(),
            intention_id: intention_id.into(),
            intention_text: intention_text.into(),
            card_id: card_id.into(),
            card_name: card_name.into(),
            reversed: false,
        }
    }

    /// Set the reversed flag.
    pub fn with_reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::from_reversed(self.reversed)
    }

    /// Seed for anchor selection, built from the full identity tuple.
    pub fn anchor_seed(&self) -> String {
        anchor_seed(
            &self.intention_id,
            &self.card_id,
            &self.position_id,
            self.orientation(),
        )
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("spreadId", &self.spread_id),
            ("positionId", &self.position_id),
            ("intentionId", &self.intention_id),
            ("intentionText", &self.intention_text),
            ("cardId", &self.card_id),
            ("cardName", &self.card_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
