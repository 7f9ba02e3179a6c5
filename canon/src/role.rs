//! Positional role policy.
//!
//! A spread position id encodes its role as a prefix (`past-1`,
//! `present`, `future-outcome`). The role fixes the tense framing the
//! generated passage must use.

use serde::{Deserialize, Serialize};

/// Error types for role resolution.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// Position id does not start with a known role prefix
    #[error("Unsupported position: {0}")]
    UnsupportedPosition(String),
}

/// Temporal role of a spread position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Past,
    Present,
    Future,
}

impl Role {
    /// All roles, in spread order.
    pub fn all() -> [Role; 3] {
        [Role::Past, Role::Present, Role::Future]
    }

    /// Resolve a role from a position id by prefix.
    ///
    /// Accepts the bare role name or the role name followed by `-`.
    pub fn from_position(position_id: &str) -> Result<Self, RoleError> {
        Self::all()
            .into_iter()
            .find(|role| {
                let prefix = role.as_str();
                position_id == prefix
                    || position_id
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('-'))
            })
            .ok_or_else(|| RoleError::UnsupportedPosition(position_id.to_string()))
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Past => "past",
            Role::Present => "present",
            Role::Future => "future",
        }
    }

    /// Whether this role requires a conditional "If" sentence.
    pub fn requires_conditional(&self) -> bool {
        matches!(self, Role::Future)
    }

    /// Role-specific instruction block for the system prompt.
    pub fn instruction(&self) -> String {
        let mut block = String::new();

        block.push_str(&format!("## POSITION: {}\n\n", self.as_str().to_uppercase()));

        match self {
            Role::Past => {
                block.push_str("- Write in the past tense about what has already shaped the situation.\n");
                block.push_str("- Frame the card as an influence that has been at work and is now being carried forward.\n");
                block.push_str("- Do not predict or advise; describe what was.\n");
            }
            Role::Present => {
                block.push_str("- Write in the present tense about what is active now.\n");
                block.push_str("- Frame the card as the energy surrounding the question at this moment.\n");
                block.push_str("- Do not look back or forward beyond a passing reference.\n");
            }
            Role::Future => {
                block.push_str("- Write about what may unfold, never as a certainty.\n");
                block.push_str("- Use conditional, possibility-based framing (may, could, might).\n");
                block.push_str("- Include exactly one sentence that begins with the word \"If\".\n");
            }
        }

        block
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
