//! Deterministic anchor selection.
//!
//! Every generated passage must demonstrably cover two core statements
//! from canon. Which two is a pure function of the request identity, so
//! reviewers can predict the coverage target and regeneration with the
//! same identity aims at the same facts.

use serde::{Deserialize, Serialize};

use crate::types::{CanonSide, Orientation};

/// The pair of core statements a draft must cover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchors {
    pub primary: String,
    pub secondary: String,
}

impl Anchors {
    /// Both anchors, in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.primary.as_str(), self.secondary.as_str()].into_iter()
    }

    /// True when canon had no core statements to anchor on.
    pub fn is_vacuous(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    pub fn is_distinct(&self) -> bool {
        self.primary != self.secondary
    }
}

/// Join identity fields with `|`, escaping `\` and `|` inside fields so
/// distinct tuples never produce the same string.
pub fn join_identity(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        for c in field.chars() {
            if c == '\\' || c == '|' {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

/// Build the selection seed from the full identity tuple.
pub fn anchor_seed(
    intention_id: &str,
    card_id: &str,
    position_id: &str,
    orientation: Orientation,
) -> String {
    join_identity(&[intention_id, card_id, position_id, orientation.as_str()])
}

/// Order-sensitive 32-bit string hash (`h = 31 * h + c`).
///
/// Independent of platform, process, and hasher randomisation.
pub fn stable_hash(seed: &str) -> u32 {
    seed.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Pick two anchors from a canon side.
///
/// With two or more core statements the anchors are distinct; with one,
/// both anchors are that statement; with none, both are empty.
pub fn select_anchors(side: &CanonSide, seed: &str) -> Anchors {
    let core: Vec<&str> = side
        .core
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    match core.len() {
        0 => Anchors::default(),
        1 => Anchors {
            primary: core[0].to_string(),
            secondary: core[0].to_string(),
        },
        n => {
            let hash = stable_hash(seed) as usize;
            let first = hash % n;
            let offset = (hash / n) % (n - 1);
            let second = (first + 1 + offset) % n;

            tracing::debug!(seed = %seed, first, second, "Selected anchors");

            Anchors {
                primary: core[first].to_string(),
                secondary: core[second].to_string(),
            }
        }
    }
}
