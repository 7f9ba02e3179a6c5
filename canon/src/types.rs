//! Core types for card canon.
//!
//! A canon record is the authored ground truth for one card: for each
//! orientation, a list of short themes and a list of longer core
//! statements. Generated text must paraphrase these, never invent past them.

use serde::{Deserialize, Serialize};

/// Which way up the card was drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Upright,
    Reversed,
}

impl Orientation {
    /// Map the caller's `reversed` flag to an orientation.
    pub fn from_reversed(reversed: bool) -> Self {
        if reversed {
            Orientation::Reversed
        } else {
            Orientation::Upright
        }
    }

    pub fn is_reversed(&self) -> bool {
        matches!(self, Orientation::Reversed)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Upright => "upright",
            Orientation::Reversed => "reversed",
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoring state of a canon record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonStatus {
    /// Reviewed and usable for generation
    #[default]
    Authored,
    /// Placeholder entry, not yet written
    Draft,
}

/// Themes and core statements for one orientation of a card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonSide {
    /// Short theme phrases, in authored order
    #[serde(default)]
    pub themes: Vec<String>,
    /// Longer core statements, in authored order
    #[serde(default)]
    pub core: Vec<String>,
}

impl CanonSide {
    /// Create a side from themes and core statements.
    pub fn new<T, C>(themes: T, core: C) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            themes: themes.into_iter().map(Into::into).collect(),
            core: core.into_iter().map(Into::into).collect(),
        }
    }

    /// True when neither themes nor core statements carry any text.
    pub fn is_empty(&self) -> bool {
        self.themes.iter().all(|t| t.trim().is_empty())
            && self.core.iter().all(|c| c.trim().is_empty())
    }
}

/// Canon for a single card, both orientations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonRecord {
    /// Card identity (e.g. "the-tower")
    #[serde(default)]
    pub card_id: String,
    /// Authoring state
    #[serde(default)]
    pub status: CanonStatus,
    /// Upright meaning
    #[serde(default)]
    pub upright: CanonSide,
    /// Reversed meaning
    #[serde(default)]
    pub reversed: CanonSide,
}

impl CanonRecord {
    /// Create an authored record.
    pub fn new(card_id: impl Into<String>, upright: CanonSide, reversed: CanonSide) -> Self {
        Self {
            card_id: card_id.into(),
            status: CanonStatus::Authored,
            upright,
            reversed,
        }
    }

    /// Get the side matching an orientation.
    pub fn side(&self, orientation: Orientation) -> &CanonSide {
        match orientation {
            Orientation::Upright => &self.upright,
            Orientation::Reversed => &self.reversed,
        }
    }

    pub fn is_authored(&self) -> bool {
        self.status == CanonStatus::Authored
    }
}
