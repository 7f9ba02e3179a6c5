//! Prompt assembly for card messages.
//!
//! Builds the system instructions and user content for one card
//! position. Assembly is pure: it only encodes intent for the generator
//! and never validates anything.

use crate::anchors::Anchors;
use crate::role::Role;
use crate::types::{CanonSide, Orientation};

/// Terms the generated passage must never contain.
pub const FORBIDDEN_TERMS: &[&str] = &["themes:", "core:", "canon", "card"];

/// Verbs that may not open a sentence.
pub const IMPERATIVE_LEADS: &[&str] = &[
    "take", "try", "remember", "focus", "reflect", "act", "choose", "commit", "consider",
    "embrace", "let", "allow",
];

/// Length targets encoded into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBands {
    pub min_words: usize,
    pub max_words: usize,
    pub min_sentences: usize,
    pub max_sentences: usize,
    /// Exact sentence count, when the hard gate enforces one
    pub required_sentences: Option<usize>,
}

/// Everything the builder needs for one card position.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub card_name: &'a str,
    pub orientation: Orientation,
    pub role: Role,
    pub intention_text: &'a str,
    pub side: &'a CanonSide,
    pub anchors: &'a Anchors,
    pub bands: PromptBands,
}

/// Assembled prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub user: String,
}

/// Assembles prompts from canon and request context.
pub struct PromptAssembler;

impl PromptAssembler {
    /// Build the system instructions and user content.
    pub fn build(input: &PromptInput<'_>) -> Prompts {
        Prompts {
            system: Self::build_system_prompt(input),
            user: Self::build_user_prompt(input),
        }
    }

    /// Build the rule block sent as the system prompt.
    pub fn build_system_prompt(input: &PromptInput<'_>) -> String {
        let bands = &input.bands;
        let mut prompt = String::new();

        prompt.push_str("# CARD MESSAGE\n\n");
        prompt.push_str("You write one short reflective passage for a single position in a reading.\n\n");

        prompt.push_str("## OUTPUT FORMAT\n\n");
        prompt.push_str("- Respond with JSON only, shaped exactly as {\"text\": \"...\"}.\n");
        prompt.push_str("- No other keys, no Markdown, no commentary before or after the JSON.\n\n");

        prompt.push_str("## LENGTH\n\n");
        match bands.required_sentences {
            Some(count) => {
                prompt.push_str(&format!("- Write exactly {} sentences.\n", count));
            }
            None => {
                prompt.push_str(&format!(
                    "- Write {} to {} sentences.\n",
                    bands.min_sentences, bands.max_sentences
                ));
            }
        }
        prompt.push_str(&format!(
            "- Use between {} and {} words. Text outside this range is rejected.\n\n",
            bands.min_words, bands.max_words
        ));

        prompt.push_str(&input.role.instruction());
        prompt.push('\n');

        prompt.push_str("## ORIENTATION\n\n");
        match input.orientation {
            Orientation::Upright => {
                prompt.push_str("- The meaning is upright: speak to it as written.\n\n");
            }
            Orientation::Reversed => {
                prompt.push_str("- The meaning is reversed: frame it as blocked, internal, or in the process of restoring.\n");
                prompt.push_str("- Never describe the inverted or opposite meaning.\n\n");
            }
        }

        prompt.push_str("## STYLE RULES\n\n");
        let forbidden: Vec<String> = FORBIDDEN_TERMS.iter().map(|t| format!("\"{}\"", t)).collect();
        prompt.push_str(&format!(
            "- Never use these words: {}.\n",
            forbidden.join(", ")
        ));
        prompt.push_str(&format!(
            "- Do not begin any sentence with a coaching verb ({}). Describe; do not instruct.\n",
            IMPERATIVE_LEADS.join(", ")
        ));
        prompt.push_str("- Paraphrase the meaning in your own words. Never list themes or copy statements verbatim.\n");
        prompt.push_str("- Quote a short fragment (2 to 6 words) of the question exactly, inside double quotes.\n");

        prompt
    }

    /// Build the user content carrying the question and meaning.
    pub fn build_user_prompt(input: &PromptInput<'_>) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!("Question: \"{}\"\n", input.intention_text.trim()));
        prompt.push_str(&format!(
            "Drawn: {} ({})\n",
            input.card_name, input.orientation
        ));
        prompt.push_str(&format!("Position: {}\n\n", input.role));

        prompt.push_str("Meaning to draw from:\n");
        prompt.push_str(&format!("themes: {}\n", input.side.themes.join("; ")));
        prompt.push_str(&format!("core: {}\n\n", input.side.core.join("; ")));

        if !input.anchors.is_vacuous() {
            prompt.push_str("The passage must clearly cover these statements, paraphrased:\n");
            prompt.push_str(&format!("1. {}\n", input.anchors.primary));
            if input.anchors.is_distinct() {
                prompt.push_str(&format!("2. {}\n", input.anchors.secondary));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "Quote this fragment of the question: \"{}\"\n",
            intention_fragment(input.intention_text)
        ));

        prompt
    }
}

/// A short quotable fragment of the intention text.
///
/// The last four words with terminal punctuation removed, or the whole
/// text when it is shorter.
pub fn intention_fragment(intention_text: &str) -> String {
    let words: Vec<&str> = intention_text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == '"' || c == '?' || c == '.' || c == '!'))
        .filter(|w| !w.is_empty())
        .collect();

    let start = words.len().saturating_sub(4);
    words[start..].join(" ")
}
