//! Text measurement helpers shared by the gates and repair strategies.

/// Words ignored when comparing intention and passage vocabulary.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "for",
    "from", "had", "has", "have", "having", "he", "her", "here", "him", "his", "how", "i", "i'm",
    "if", "in", "into", "is", "it", "it's", "its", "just", "me", "mine", "more", "most", "my",
    "myself", "no", "not", "now", "of", "on", "or", "our", "out", "over", "she", "should", "so",
    "some", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "up", "very", "was", "we", "were", "what", "when", "where",
    "which", "who", "why", "will", "with", "would", "you", "your", "yours",
];

/// Number of whitespace-delimited tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201D}' | '\u{2019}' | ')' | ']')
}

/// Split text into sentences.
///
/// A sentence ends at a run of `.`, `!`, `?`, together with any closing
/// quotes or brackets right after it. Trailing text without terminal
/// punctuation is the last sentence. Returned slices keep their
/// punctuation and are trimmed.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if is_terminal(next) || is_closing(next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        push_sentence(&mut sentences, &text[start..end]);
        start = end;
    }

    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if trimmed.chars().any(char::is_alphanumeric) {
        sentences.push(trimmed);
    }
}

pub fn sentence_count(text: &str) -> usize {
    split_sentences(text).len()
}

/// Lower-cased first word of a fragment with surrounding punctuation removed.
pub fn lead_word(fragment: &str) -> Option<String> {
    fragment
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Lower-cased word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|t| t.trim_matches(|c| c == '\'' || c == '\u{2019}').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Tokens that carry meaning: not stop words, at least three characters.
pub fn meaningful_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for token in tokenize(text) {
        if token.chars().count() >= 3 && !is_stop_word(&token) && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}
