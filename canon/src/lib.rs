//! Card canon and prompt assembly.
//!
//! This crate owns the knowledge side of card-message generation:
//!
//! - **Canon**: authored themes and core statements per card and orientation
//! - **Role policy**: tense framing derived from the spread position
//! - **Anchors**: the two core statements a passage must cover, chosen deterministically
//! - **Prompts**: system and user text handed to the generator
//!
//! # Key Components
//!
//! - [`CanonSource`]: Trait for loading canon records (file-backed or in-memory)
//! - [`Role`]: Past / present / future framing
//! - [`select_anchors`]: Stable anchor selection from an identity seed
//! - [`PromptAssembler`]: Builds prompts from canon, role, and anchors
//!
//! # Example
//!
//! ```ignore
//! use canon::{load_side, select_anchors, anchor_seed, FileCanonSource, Orientation};
//!
//! let source = FileCanonSource::new("./canon");
//! let side = load_side(&source, "the-tower", Orientation::Upright).await?;
//! let seed = anchor_seed("journey", "the-tower", "past-1", Orientation::Upright);
//! let anchors = select_anchors(&side, &seed);
//! ```

pub mod anchors;
pub mod prompt;
pub mod role;
pub mod source;
pub mod types;

// Re-export main types
pub use anchors::{anchor_seed, join_identity, select_anchors, stable_hash, Anchors};
pub use prompt::{intention_fragment, PromptAssembler, PromptBands, PromptInput, Prompts};
pub use role::{Role, RoleError};
pub use source::{load_side, CanonError, CanonSource, FileCanonSource, InMemoryCanonSource};
pub use types::*;
