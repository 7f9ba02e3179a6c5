//! Repair strategies.
//!
//! Each strategy takes a failing candidate and a reason, and returns a
//! new candidate. Strategies are tried in order by a [`RepairChain`],
//! which re-runs the hard gate after every step; a strategy's own claim
//! of success is never trusted.

use async_trait::async_trait;
use canon::{intention_fragment, Anchors, CanonSide, Prompts, Role};

use crate::backend::traits::{CompletionRequest, LlmBackend};
use crate::config::GenerationConfig;
use crate::text::{meaningful_tokens, split_sentences, word_count};
use crate::validate::{parse_generator_output, validate_text, DraftError};

/// Shared inputs for every repair of one request.
pub struct RepairContext<'a> {
    pub backend: &'a dyn LlmBackend,
    pub prompts: &'a Prompts,
    pub config: &'a GenerationConfig,
    pub role: Role,
    pub side: &'a CanonSide,
    pub anchors: &'a Anchors,
    pub intention_text: &'a str,
}

impl RepairContext<'_> {
    /// One generator call expecting `{"text": ...}` back.
    async fn generate(
        &self,
        system: String,
        user: String,
        temperature: f32,
    ) -> Result<String, DraftError> {
        let request = CompletionRequest::user(user)
            .with_system(system)
            .with_temperature(temperature)
            .with_max_tokens(self.config.sampling.max_output_tokens)
            .with_json_output();

        let response = self.backend.complete(request).await?;
        parse_generator_output(&response.content)
    }
}

/// Why a candidate is being repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairReason {
    /// Word count needs to move into the target band
    WordCount { count: usize },
    /// Soft-gate issues, already phrased for the generator
    Quality(String),
}

impl std::fmt::Display for RepairReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairReason::WordCount { count } => write!(f, "{} words", count),
            RepairReason::Quality(reason) => f.write_str(reason),
        }
    }
}

/// A way of turning a failing candidate into a new one.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn repair(
        &self,
        ctx: &RepairContext<'_>,
        text: &str,
        reason: &RepairReason,
    ) -> Result<String, DraftError>;
}

/// Regenerate the passage from scratch under stricter instructions.
pub struct FullRewrite;

#[async_trait]
impl RepairStrategy for FullRewrite {
    fn name(&self) -> &'static str {
        "full_rewrite"
    }

    async fn repair(
        &self,
        ctx: &RepairContext<'_>,
        text: &str,
        reason: &RepairReason,
    ) -> Result<String, DraftError> {
        let system = rewrite_system_prompt(ctx);
        let user = format!(
            "{}\n\nPrevious draft:\n{}\n\nIt was rejected because: {}\n\
             Write a new passage that follows every rule above.",
            ctx.prompts.user, text, reason
        );

        ctx.generate(system, user, ctx.config.sampling.rewrite_temperature)
            .await
    }
}

fn rewrite_system_prompt(ctx: &RepairContext<'_>) -> String {
    let limits = &ctx.config.limits;
    let mut prompt = ctx.prompts.system.clone();

    prompt.push_str("\n\n## REWRITE RULES\n");
    if !ctx.anchors.is_vacuous() {
        prompt.push_str(&format!(
            "- Sentence 1 or 2 must clearly restate in your own words: \"{}\"\n",
            ctx.anchors.primary
        ));
        prompt.push_str(&format!(
            "- Sentence 3 or 4 must clearly restate in your own words: \"{}\"\n",
            ctx.anchors.secondary
        ));
    }
    prompt.push_str(
        "- Describe and reflect; turn any instruction or advice into observation.\n",
    );
    prompt.push_str(&format!(
        "- Quote this fragment of the question exactly, in double quotes: \"{}\"\n",
        intention_fragment(ctx.intention_text)
    ));
    prompt.push_str(&format!(
        "- Aim for {} to {} words.\n",
        limits.target_min_words, limits.target_max_words
    ));

    prompt
}

/// Insert or remove one mid-passage clause to move the word count
/// toward the target band, keeping everything else verbatim.
pub struct MicroRepair;

#[async_trait]
impl RepairStrategy for MicroRepair {
    fn name(&self) -> &'static str {
        "micro_repair"
    }

    async fn repair(
        &self,
        ctx: &RepairContext<'_>,
        text: &str,
        _reason: &RepairReason,
    ) -> Result<String, DraftError> {
        let limits = &ctx.config.limits;
        let count = word_count(text);
        let midpoint = (limits.target_min_words + limits.target_max_words) / 2;

        let edit = if count < limits.target_min_words {
            let fewest = limits.target_min_words - count;
            let most = midpoint.saturating_sub(count).max(fewest);
            format!(
                "Insert exactly one clause of {} to {} words somewhere in the middle of the passage.",
                fewest, most
            )
        } else {
            let fewest = count.saturating_sub(limits.target_max_words).max(1);
            let most = count.saturating_sub(midpoint).max(fewest);
            format!(
                "Remove exactly one clause of {} to {} words from the middle of the passage.",
                fewest, most
            )
        };

        let system = "You adjust the length of a short reflective passage.\n\
             Change as little as possible and keep the voice and tense.\n\
             Return only JSON of the form {\"text\": \"...\"}."
            .to_string();
        let user = format!(
            "The passage below has {} words. It must end up with {} to {} words.\n\
             {}\n\
             Every other word stays exactly as written, in the same order.\n\n\
             Passage:\n{}",
            count, limits.target_min_words, limits.target_max_words, edit, text
        );

        ctx.generate(system, user, ctx.config.sampling.micro_repair_temperature)
            .await
    }
}

/// Deterministic lengthening without a generator call.
///
/// Appends one clause built from theme words and the intention to the
/// third sentence. Only acts on short passages with at least three
/// sentences; anything else comes back unchanged.
pub struct LocalPadding;

#[async_trait]
impl RepairStrategy for LocalPadding {
    fn name(&self) -> &'static str {
        "local_padding"
    }

    async fn repair(
        &self,
        ctx: &RepairContext<'_>,
        text: &str,
        _reason: &RepairReason,
    ) -> Result<String, DraftError> {
        if word_count(text) >= ctx.config.limits.min_words {
            return Ok(text.to_string());
        }
        Ok(pad_text(text, ctx.role, ctx.side, ctx.intention_text))
    }
}

/// Append a padding clause to the third sentence.
pub fn pad_text(text: &str, role: Role, side: &CanonSide, intention_text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.len() < 3 {
        return text.to_string();
    }

    let clause = padding_clause(role, side, intention_text);
    let third = sentences[2];
    let body = third.trim_end_matches(|c: char| !c.is_alphanumeric());
    let tail = &third[body.len()..];
    let tail = if tail.is_empty() { "." } else { tail };
    let padded = format!("{}, {}{}", body, clause, tail);

    let mut out = sentences;
    out[2] = &padded;
    out.join(" ")
}

fn padding_clause(role: Role, side: &CanonSide, intention_text: &str) -> String {
    let themes = theme_words(side);
    let themes = match themes.len() {
        0 => "these old threads".to_string(),
        1 => themes[0].clone(),
        n => format!("{} and {}", themes[..n - 1].join(", "), themes[n - 1]),
    };

    let tokens: Vec<String> = meaningful_tokens(intention_text).into_iter().take(2).collect();
    let focus = if tokens.is_empty() {
        "this question".to_string()
    } else {
        format!("your {}", tokens.join(" "))
    };

    match role {
        Role::Past => format!(
            "as {} were already quietly shaping what you carried into {}",
            themes, focus
        ),
        Role::Present => format!(
            "as {} stay quietly present in the way you hold {} right now",
            themes, focus
        ),
        Role::Future => format!(
            "as {} may yet gather around {} in the time that follows",
            themes, focus
        ),
    }
}

/// Longest word (four or more letters) of each of the first three themes.
fn theme_words(side: &CanonSide) -> Vec<String> {
    side.themes
        .iter()
        .filter_map(|theme| {
            theme
                .split(|c: char| !c.is_alphabetic())
                .filter(|w| w.chars().count() >= 4)
                .max_by_key(|w| w.chars().count())
                .map(str::to_lowercase)
        })
        .take(3)
        .collect()
}

/// One executed step of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairStep {
    pub strategy: &'static str,
    /// Error from the strategy or the hard gate, if the step failed
    pub error: Option<String>,
}

/// Result of running a chain.
#[derive(Debug)]
pub struct ChainOutcome {
    pub result: Result<String, DraftError>,
    pub steps: Vec<RepairStep>,
}

/// Ordered strategies with hard-gate re-validation between steps.
///
/// A failed generator call leaves the working text unchanged, so the next
/// strategy sees the last text that was actually produced.
pub struct RepairChain {
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl RepairChain {
    pub fn new(strategies: Vec<Box<dyn RepairStrategy>>) -> Self {
        Self { strategies }
    }

    /// Word-count repair: micro-repair, then local padding.
    pub fn length() -> Self {
        Self::new(vec![Box::new(MicroRepair), Box::new(LocalPadding)])
    }

    /// Soft-gate repair: one full rewrite.
    pub fn rewrite() -> Self {
        Self::new(vec![Box::new(FullRewrite)])
    }

    /// Run strategies in order until one yields hard-valid text.
    pub async fn run(
        &self,
        ctx: &RepairContext<'_>,
        text: &str,
        reason: &RepairReason,
    ) -> ChainOutcome {
        let mut current = text.to_string();
        let mut steps = Vec::new();
        let mut last_error = None;

        for strategy in &self.strategies {
            let error = match strategy.repair(ctx, &current, reason).await {
                Ok(candidate) => {
                    let verdict = validate_text(&candidate, ctx.role, &ctx.config.limits);
                    current = candidate;
                    match verdict {
                        Ok(()) => {
                            steps.push(RepairStep {
                                strategy: strategy.name(),
                                error: None,
                            });
                            return ChainOutcome {
                                result: Ok(current),
                                steps,
                            };
                        }
                        Err(violation) => DraftError::from(violation),
                    }
                }
                Err(e) => e,
            };

            tracing::debug!(strategy = strategy.name(), error = %error, "Repair step failed");
            steps.push(RepairStep {
                strategy: strategy.name(),
                error: Some(error.to_string()),
            });
            last_error = Some(error);
        }

        let error = last_error.unwrap_or_else(|| {
            DraftError::MalformedGeneratorOutput("no repair strategies configured".to_string())
        });
        ChainOutcome {
            result: Err(error),
            steps,
        }
    }
}
