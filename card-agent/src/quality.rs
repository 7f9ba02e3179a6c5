//! Soft gate: quality heuristics over hard-valid text.
//!
//! Scoring never fails. It measures a candidate fresh every time and
//! reports whatever issues it finds; the orchestrator decides what to do
//! with them.

use canon::prompt::IMPERATIVE_LEADS;
use canon::{Anchors, Role};
use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::text::{
    lead_word, meaningful_tokens, sentence_count, split_sentences, tokenize, word_count,
};

/// Stock phrases that read as filler or break the voice.
pub const DISCOURAGED_PHRASES: &[&str] = &[
    "be mindful",
    "moving forward",
    "it is important to",
    "in conclusion",
    "the card suggests",
    "the card indicates",
    "this card",
    "trust the process",
    "the universe has",
    "journey of self-discovery",
];

/// Phrases that give direct advice wherever they appear.
const ADVICE_PHRASES: &[&str] = &["you should", "you must", "you need to"];

/// Minimum length of an anchor word that counts toward coverage.
const CONTENT_WORD_MIN_CHARS: usize = 5;

/// Commas in one sentence that suggest a list of themes.
const THEME_LIST_COMMAS: usize = 4;

/// Inputs that stay fixed while scoring candidates for one request.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub role: Role,
    pub anchors: &'a Anchors,
    pub intention_text: &'a str,
    pub limits: &'a LimitsConfig,
}

/// Measurements of one candidate text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftState {
    pub word_count: usize,
    pub sentence_count: usize,
    pub anchors_covered: usize,
    pub anchors_total: usize,
    pub discouraged_hits: usize,
    pub references_intention: bool,
}

impl DraftState {
    /// Fraction of anchors covered, in `0.0..=1.0`.
    pub fn coverage_ratio(&self) -> f32 {
        if self.anchors_total == 0 {
            return 1.0;
        }
        self.anchors_covered as f32 / self.anchors_total as f32
    }

    pub fn coverage_complete(&self) -> bool {
        self.anchors_covered >= self.anchors_total
    }
}

/// A single soft-gate finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum QualityIssue {
    IncompleteCoverage { covered: usize, total: usize },
    DiscouragedPhrases { hits: usize },
    OutsideTargetBand { words: usize, min: usize, max: usize },
    SentenceCountOutsideBand { sentences: usize, min: usize, max: usize },
    EmbeddedImperative { phrase: String },
    MissingIntentionReference,
    ThemeDump,
    ConditionalCount { found: usize },
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityIssue::IncompleteCoverage { covered, total } => {
                write!(f, "only {} of {} anchor statements are reflected", covered, total)
            }
            QualityIssue::DiscouragedPhrases { hits } => {
                write!(f, "{} stock phrases need plainer wording", hits)
            }
            QualityIssue::OutsideTargetBand { words, min, max } => {
                write!(f, "{} words; aim for {} to {}", words, min, max)
            }
            QualityIssue::SentenceCountOutsideBand { sentences, min, max } => {
                write!(f, "{} sentences; aim for {} to {}", sentences, min, max)
            }
            QualityIssue::EmbeddedImperative { phrase } => {
                write!(f, "gives direct advice (\"{}\")", phrase)
            }
            QualityIssue::MissingIntentionReference => {
                write!(f, "does not clearly refer back to the question")
            }
            QualityIssue::ThemeDump => write!(f, "lists themes instead of weaving them in"),
            QualityIssue::ConditionalCount { found } => {
                write!(
                    f,
                    "needs exactly one sentence beginning with \"If\", found {}",
                    found
                )
            }
        }
    }
}

/// Soft-gate result for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub state: DraftState,
    pub issues: Vec<QualityIssue>,
}

impl QualityVerdict {
    pub fn needs_repair(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Complete coverage, few stock phrases, and inside the target band.
    pub fn is_clean_accept(&self, limits: &LimitsConfig) -> bool {
        self.state.coverage_complete()
            && self.state.discouraged_hits < limits.discouraged_hit_limit
            && limits.in_target_band(self.state.word_count)
    }

    /// Issues joined into one line for a rewrite prompt.
    pub fn reason(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Score a hard-valid candidate.
pub fn score(text: &str, ctx: &ScoringContext<'_>) -> QualityVerdict {
    let limits = ctx.limits;
    let lowered = text.to_lowercase();

    let anchors_total = ctx.anchors.iter().count();
    let anchors_covered = ctx
        .anchors
        .iter()
        .filter(|anchor| anchor_covered(anchor, &lowered))
        .count();

    let state = DraftState {
        word_count: word_count(text),
        sentence_count: sentence_count(text),
        anchors_covered,
        anchors_total,
        discouraged_hits: discouraged_hits(&lowered),
        references_intention: references_intention(ctx.intention_text, text),
    };

    let mut issues = Vec::new();

    if !state.coverage_complete() {
        issues.push(QualityIssue::IncompleteCoverage {
            covered: state.anchors_covered,
            total: state.anchors_total,
        });
    }
    if state.discouraged_hits >= limits.discouraged_hit_limit {
        issues.push(QualityIssue::DiscouragedPhrases {
            hits: state.discouraged_hits,
        });
    }
    if !limits.in_target_band(state.word_count) {
        issues.push(QualityIssue::OutsideTargetBand {
            words: state.word_count,
            min: limits.target_min_words,
            max: limits.target_max_words,
        });
    }
    if !limits.in_sentence_band(state.sentence_count) {
        issues.push(QualityIssue::SentenceCountOutsideBand {
            sentences: state.sentence_count,
            min: limits.min_sentences,
            max: limits.max_sentences,
        });
    }
    if let Some(phrase) = embedded_imperative(text) {
        issues.push(QualityIssue::EmbeddedImperative { phrase });
    }
    if !state.references_intention {
        issues.push(QualityIssue::MissingIntentionReference);
    }
    if is_theme_dump(text) {
        issues.push(QualityIssue::ThemeDump);
    }
    if ctx.role.requires_conditional() && limits.enforce_future_conditional {
        let found = conditional_sentences(text);
        if found != 1 {
            issues.push(QualityIssue::ConditionalCount { found });
        }
    }

    tracing::trace!(
        words = state.word_count,
        covered = state.anchors_covered,
        issues = issues.len(),
        "Scored candidate"
    );

    QualityVerdict { state, issues }
}

/// Whether an anchor is reflected in already lower-cased text.
///
/// Content words are anchor tokens of five or more characters. The
/// anchor counts as covered when at least two of them (or all of them,
/// if it has fewer) appear in the text. An anchor with no content words
/// is covered vacuously.
pub fn anchor_covered(anchor: &str, lowered_text: &str) -> bool {
    let mut content: Vec<String> = Vec::new();
    for token in tokenize(anchor) {
        if token.chars().count() >= CONTENT_WORD_MIN_CHARS && !content.contains(&token) {
            content.push(token);
        }
    }

    let required = content.len().min(2);
    let hits = content
        .iter()
        .filter(|word| lowered_text.contains(word.as_str()))
        .count();
    hits >= required
}

/// Occurrences of discouraged phrases in lower-cased text.
pub fn discouraged_hits(lowered_text: &str) -> usize {
    DISCOURAGED_PHRASES
        .iter()
        .map(|phrase| lowered_text.matches(phrase).count())
        .sum()
}

/// Whether the text shares enough vocabulary with the intention.
///
/// One shared meaningful token is enough for short intentions; five or
/// more meaningful tokens raise the bar to two. A text token matches an
/// intention token when equal or an inflection of it ("journeys").
pub fn references_intention(intention_text: &str, text: &str) -> bool {
    let intention = meaningful_tokens(intention_text);
    if intention.is_empty() {
        return true;
    }

    let required = if intention.len() >= 5 { 2 } else { 1 };
    let tokens = tokenize(text);
    let overlap = intention
        .iter()
        .filter(|wanted| tokens.iter().any(|t| t.starts_with(wanted.as_str())))
        .count();

    overlap >= required
}

/// Explicit theme wording or a sentence that reads as a list.
pub fn is_theme_dump(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if lowered.contains("themes of") || lowered.contains("theme of") {
        return true;
    }
    split_sentences(text)
        .iter()
        .any(|s| s.matches(',').count() >= THEME_LIST_COMMAS)
}

/// An imperative anywhere other than the start of a sentence.
///
/// Catches clauses after `,` `;` `:` that open with a coaching verb,
/// and advice phrases such as "you should".
pub fn embedded_imperative(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if let Some(phrase) = ADVICE_PHRASES.iter().find(|p| contains_phrase(&lowered, p)) {
        return Some((*phrase).to_string());
    }

    split_sentences(text).into_iter().find_map(|sentence| {
        sentence
            .split([',', ';', ':'])
            .skip(1)
            .filter_map(lead_word)
            .find(|word| IMPERATIVE_LEADS.contains(&word.as_str()))
    })
}

/// Number of sentences that open with "If".
pub fn conditional_sentences(text: &str) -> usize {
    split_sentences(text)
        .into_iter()
        .filter_map(lead_word)
        .filter(|word| word == "if")
        .count()
}

fn contains_phrase(lowered: &str, phrase: &str) -> bool {
    lowered.match_indices(phrase).any(|(i, _)| {
        let before = lowered[..i].chars().next_back();
        let after = lowered[i + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
