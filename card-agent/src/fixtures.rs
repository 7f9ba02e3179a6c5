//! Shared test fixtures.
//!
//! Word counts are fixed: keep them in sync with the assertions that use
//! them when editing any passage.

use canon::{Anchors, CanonRecord, CanonSide, InMemoryCanonSource};

use crate::request::GenerationRequest;

pub const INTENTION: &str = "Where am I on my spiritual journey?";

/// Past role, 100 words, six sentences, covers both anchors.
pub const PAST_CLEAN: &str = "Not long ago, something in your spiritual journey shook loose, and facing an old fear became the quiet work behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about trusting what a new chapter might hold before its first page had turned. You were learning that endings can keep their own kind of grace. That lesson now travels with you into whatever is still unfolding.";

/// Past role, 99 words, covers both anchors, three discouraged phrases.
pub const PAST_DISCOURAGED: &str = "Not long ago, something in your spiritual journey shook loose, and facing an old fear became the quiet work behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about trusting what a new chapter might hold before its first page had turned. Moving forward, it is important to be mindful of that grace. That lesson now travels with you into whatever is still unfolding.";

/// Past role, 93 words, six sentences, covers neither anchor.
pub const PAST_UNCOVERED: &str = "Not long ago, something in your spiritual journey shook loose, and the quiet work went on behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about what might hold before the next page had turned. You were learning that endings can keep their own kind of grace. That lesson now travels with you into whatever is still unfolding.";

/// Past role, 82 words (inside the hard band, below the target band),
/// covers neither anchor.
pub const PAST_UNCOVERED_SHORT: &str = "Not long ago, something in your spiritual journey shook loose, and the quiet work went on behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about what might hold before the next page had turned. You were learning that endings can keep their own kind of grace.";

/// Past role, 70 words (below the hard band), six sentences, covers both anchors.
pub const PAST_SHORT: &str = "Something in your spiritual journey shook loose, and facing an old fear became quiet work. Solid ground gave way and cleared needed room. The question of \"my spiritual journey\" moved beneath the surface. Each loss taught you about trusting a new chapter before its first page turned. Endings kept their own grace. That lesson travels with you still, into whatever is unfolding now, slowly and without any hurry at all.";

/// Future role, 91 words, exactly one "If" sentence, covers both anchors.
pub const FUTURE_CLEAN: &str = "What lies ahead for your spiritual journey may begin with facing an old fear that has waited patiently at the edge of things. The path could open slowly, asking for patience more than certainty. If the ground shifts again, it may be clearing space rather than taking something away. There could be a season of trusting a new chapter before its shape is fully visible. In \"my spiritual journey\" there may be room for a steadier kind of faith. What arrives might feel unfamiliar at first and then, gradually, like home.";

pub fn core_statements() -> Vec<&'static str> {
    vec!["facing an old fear", "trusting a new chapter"]
}

pub fn tower_side() -> CanonSide {
    CanonSide::new(
        vec!["sudden change", "revelation", "liberation"],
        core_statements(),
    )
}

pub fn tower_record() -> CanonRecord {
    CanonRecord::new("the-tower", tower_side(), tower_side())
}

pub fn canon_store() -> InMemoryCanonSource {
    InMemoryCanonSource::with_records([tower_record()])
}

pub fn anchors() -> Anchors {
    Anchors {
        primary: "facing an old fear".to_string(),
        secondary: "trusting a new chapter".to_string(),
    }
}

pub fn request(position_id: &str) -> GenerationRequest {
    GenerationRequest::new(
        "three-card",
        position_id,
        "journey",
        INTENTION,
        "the-tower",
        "The Tower",
    )
}
