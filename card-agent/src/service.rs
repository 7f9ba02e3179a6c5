//! CardMessageService - main entry point for card message generation.
//!
//! Drives one request through the draft, gate, and repair loop:
//!
//! ```text
//! draft ──► hard gate ──► soft gate ──► accept
//!   ▲          │ word count    │ issues
//!   │          ▼               ▼
//!   │     length repair    rewrite rounds ──► accept on coverage
//!   │                          │
//!   └──────── next attempt ◄───┘
//!                 │ attempts exhausted
//!                 ▼
//!        best hard-valid text (fallback) or error
//! ```

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use canon::{
    load_side, select_anchors, Anchors, CanonError, CanonSide, CanonSource, PromptAssembler,
    PromptInput, Prompts, Role, RoleError,
};

use crate::audit::{AuditEntry, AuditLog, GenerationEvent};
use crate::backend::metered::{CallMeter, MeteredBackend};
use crate::backend::traits::{CompletionRequest, LlmBackend};
use crate::config::{ConfigError, GenerationConfig, LimitsConfig};
use crate::quality::{score, QualityVerdict, ScoringContext};
use crate::repair::{
    MicroRepair, RepairChain, RepairContext, RepairReason, RepairStep, RepairStrategy,
};
use crate::request::GenerationRequest;
use crate::response::{GenerationOutcome, GenerationResult, ResultKey};
use crate::text::word_count;
use crate::validate::{parse_generator_output, validate_text, DraftError};

/// Error types for the service.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Request has blank required fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Position does not map to a role
    #[error(transparent)]
    UnsupportedPosition(#[from] RoleError),

    /// Canon missing, empty, or unreadable
    #[error("Canon error: {0}")]
    Canon(#[from] CanonError),

    /// No backend answered the availability probe
    #[error("No LLM backend available")]
    NoBackendAvailable,

    /// Every attempt failed without a hard-valid text
    #[error("Generation exhausted after {attempts} attempts: {last_error}")]
    GenerationExhausted { attempts: u32, last_error: String },
}

impl GenerationError {
    /// Whether retrying with the same inputs cannot help.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            GenerationError::InvalidRequest(_)
                | GenerationError::UnsupportedPosition(_)
                | GenerationError::Canon(_)
        )
    }
}

/// Main entry point for card message generation.
///
/// Holds no per-request state, so one service can serve concurrent
/// generations.
pub struct CardMessageService {
    /// Configuration
    config: GenerationConfig,
    /// Available LLM backends, in preference order
    backends: Vec<Arc<dyn LlmBackend>>,
    /// Canon store
    canon: Arc<dyn CanonSource>,
    /// Audit log
    audit: Arc<AuditLog>,
}

impl CardMessageService {
    /// Create a new service with the given backends and canon store.
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>, canon: Arc<dyn CanonSource>) -> Self {
        Self {
            config: GenerationConfig::default(),
            backends,
            canon,
            audit: Arc::new(AuditLog::new()),
        }
    }

    /// Replace the configuration after checking it.
    pub fn with_config(mut self, config: GenerationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Share an audit log with other services.
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate the message for one card position.
    pub async fn generate_card_message(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            return Err(GenerationError::InvalidRequest(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        let start = Instant::now();
        let key = ResultKey::for_request(&request);

        let entry_id = if self.config.audit_enabled {
            Some(self.audit.log_request(&request, &key).await)
        } else {
            None
        };

        info!(
            key = %key,
            card_id = %request.card_id,
            position_id = %request.position_id,
            orientation = %request.orientation(),
            "Generating card message"
        );

        let meter = CallMeter::new();
        let mut run = RunState::default();
        let deadline = self.config.budget.request_timeout();

        let timed = tokio::time::timeout(deadline, self.execute(&request, &meter, &mut run)).await;
        let outcome = timed.unwrap_or_else(|_| {
            Err(GenerationError::GenerationExhausted {
                attempts: run.draft_attempts,
                last_error: format!(
                    "deadline of {}ms exceeded",
                    self.config.budget.request_timeout_ms
                ),
            })
        });

        let mut cost = meter.snapshot();
        cost.draft_attempts = run.draft_attempts;
        cost.processing_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok((text, outcome)) => {
                let words = word_count(&text);
                run.trace.push(GenerationEvent::Accepted { outcome, words });

                if outcome.is_flagged() {
                    warn!(key = %key, outcome = ?outcome, words, "Returning fallback card message");
                } else {
                    info!(
                        key = %key,
                        outcome = ?outcome,
                        words,
                        generator_calls = cost.generator_calls,
                        "Card message generated"
                    );
                }

                let result = GenerationResult::new(key, text, outcome, cost);
                if let Some(entry_id) = entry_id {
                    self.audit.log_result(&entry_id, run.trace, &result).await;
                }
                Ok(result)
            }
            Err(error) => {
                warn!(key = %key, error = %error, "Card message generation failed");
                run.trace.push(GenerationEvent::Failed {
                    error: error.to_string(),
                });
                if let Some(entry_id) = entry_id {
                    self.audit
                        .log_failure(&entry_id, run.trace, &error.to_string(), cost)
                        .await;
                }
                Err(error)
            }
        }
    }

    /// Get recent audit entries.
    pub async fn get_audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit).await
    }

    /// Shared handle to the audit log.
    pub fn audit_log(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit)
    }

    /// Select the first available backend.
    async fn select_backend(&self) -> Result<Arc<dyn LlmBackend>, GenerationError> {
        for backend in &self.backends {
            if backend.is_available().await {
                return Ok(Arc::clone(backend));
            }
        }
        Err(GenerationError::NoBackendAvailable)
    }

    /// Resolve preconditions, then run the loop.
    async fn execute(
        &self,
        request: &GenerationRequest,
        meter: &CallMeter,
        run: &mut RunState,
    ) -> Result<(String, GenerationOutcome), GenerationError> {
        let role = Role::from_position(&request.position_id)?;
        let side = load_side(self.canon.as_ref(), &request.card_id, request.orientation()).await?;
        let anchors = select_anchors(&side, &request.anchor_seed());

        let prompts = PromptAssembler::build(&PromptInput {
            card_name: &request.card_name,
            orientation: request.orientation(),
            role,
            intention_text: &request.intention_text,
            side: &side,
            anchors: &anchors,
            bands: self.config.prompt_bands(),
        });

        let backend = self.select_backend().await?;
        debug!(
            backend = backend.id(),
            role = %role,
            primary = %anchors.primary,
            secondary = %anchors.secondary,
            "Prepared generation"
        );

        let generation = Generation {
            config: &self.config,
            intention_text: &request.intention_text,
            role,
            side,
            anchors,
            prompts,
            backend: MeteredBackend::new(backend.as_ref(), meter),
        };

        generation.run(run).await
    }
}

/// Mutable bookkeeping for one generation.
#[derive(Default)]
struct RunState {
    trace: Vec<GenerationEvent>,
    draft_attempts: u32,
    best: Option<Candidate>,
    last_error: Option<String>,
}

impl RunState {
    fn fail(&mut self, event: GenerationEvent, error: impl ToString) {
        self.trace.push(event);
        self.last_error = Some(error.to_string());
    }

    fn record_steps(&mut self, attempt: u32, steps: &[RepairStep]) {
        for step in steps {
            self.trace.push(GenerationEvent::RepairStep {
                attempt,
                strategy: step.strategy.to_string(),
                error: step.error.clone(),
            });
        }
    }
}

/// A hard-valid text together with its soft verdict.
struct Candidate {
    text: String,
    verdict: QualityVerdict,
}

impl Candidate {
    /// Ordering key: coverage, then target band, then fewer issues, then
    /// distance from the middle of the target band.
    fn rank(&self, limits: &LimitsConfig) -> (usize, bool, Reverse<usize>, Reverse<usize>) {
        let words = self.verdict.state.word_count;
        let middle = (limits.target_min_words + limits.target_max_words) / 2;
        (
            self.verdict.state.anchors_covered,
            limits.in_target_band(words),
            Reverse(self.verdict.issues.len()),
            Reverse(words.abs_diff(middle)),
        )
    }
}

/// Keep the better of the held candidate and a new one; ties keep the
/// earlier candidate.
fn keep_better(
    slot: &mut Option<Candidate>,
    text: &str,
    verdict: &QualityVerdict,
    limits: &LimitsConfig,
) {
    let candidate = Candidate {
        text: text.to_string(),
        verdict: verdict.clone(),
    };
    let better = match slot {
        Some(held) => candidate.rank(limits) > held.rank(limits),
        None => true,
    };
    if better {
        *slot = Some(candidate);
    }
}

/// Everything fixed for one request once preconditions are resolved.
struct Generation<'a> {
    config: &'a GenerationConfig,
    intention_text: &'a str,
    role: Role,
    side: CanonSide,
    anchors: Anchors,
    prompts: Prompts,
    backend: MeteredBackend<'a>,
}

impl Generation<'_> {
    fn limits(&self) -> &LimitsConfig {
        &self.config.limits
    }

    fn repair_context(&self) -> RepairContext<'_> {
        RepairContext {
            backend: &self.backend,
            prompts: &self.prompts,
            config: self.config,
            role: self.role,
            side: &self.side,
            anchors: &self.anchors,
            intention_text: self.intention_text,
        }
    }

    fn score(&self, text: &str) -> QualityVerdict {
        score(
            text,
            &ScoringContext {
                role: self.role,
                anchors: &self.anchors,
                intention_text: self.intention_text,
                limits: self.limits(),
            },
        )
    }

    async fn draft(&self) -> Result<String, DraftError> {
        let sampling = &self.config.sampling;
        let request = CompletionRequest::user(&self.prompts.user)
            .with_system(&self.prompts.system)
            .with_temperature(sampling.draft_temperature)
            .with_max_tokens(sampling.max_output_tokens)
            .with_json_output();

        let response = self.backend.complete(request).await?;
        parse_generator_output(&response.content)
    }

    async fn run(&self, run: &mut RunState) -> Result<(String, GenerationOutcome), GenerationError> {
        for attempt in 1..=self.config.budget.draft_attempts {
            run.draft_attempts = attempt;
            if let Some(accepted) = self.attempt(attempt, run).await {
                return Ok(accepted);
            }
        }
        self.fall_back(run).await
    }

    /// One draft attempt. `None` moves on to the next attempt.
    async fn attempt(
        &self,
        attempt: u32,
        run: &mut RunState,
    ) -> Option<(String, GenerationOutcome)> {
        let limits = self.limits();

        let draft = match self.draft().await {
            Ok(text) => text,
            Err(error) => {
                debug!(attempt, error = %error, "Draft failed");
                run.fail(
                    GenerationEvent::DraftFailed {
                        attempt,
                        error: error.to_string(),
                    },
                    error,
                );
                return None;
            }
        };
        run.trace.push(GenerationEvent::DraftProduced {
            attempt,
            words: word_count(&draft),
        });

        let (text, verdict) = match validate_text(&draft, self.role, limits) {
            Ok(()) => {
                let verdict = self.score(&draft);
                (draft, verdict)
            }
            Err(violation) => {
                debug!(attempt, violation = %violation, "Draft failed hard gate");
                let word_count_failure = violation.is_word_count();
                run.fail(
                    GenerationEvent::HardGateFailed {
                        attempt,
                        violation: violation.to_string(),
                    },
                    DraftError::from(violation),
                );
                if !word_count_failure {
                    return None;
                }

                let reason = RepairReason::WordCount {
                    count: word_count(&draft),
                };
                let chain = RepairChain::length()
                    .run(&self.repair_context(), &draft, &reason)
                    .await;
                run.record_steps(attempt, &chain.steps);

                let repaired = match chain.result {
                    Ok(text) => text,
                    Err(error) => {
                        run.last_error = Some(error.to_string());
                        return None;
                    }
                };
                let verdict = self.score(&repaired);
                if verdict.state.coverage_complete() {
                    return Some((repaired, GenerationOutcome::LengthRepaired));
                }
                (repaired, verdict)
            }
        };

        run.trace.push(soft_event(attempt, &verdict));
        keep_better(&mut run.best, &text, &verdict, limits);
        if !verdict.needs_repair() {
            return Some((text, GenerationOutcome::Clean));
        }

        let mut attempt_best = None;
        keep_better(&mut attempt_best, &text, &verdict, limits);

        let mut current = text;
        let mut current_verdict = verdict;
        let rewrite = RepairChain::rewrite();

        for _ in 0..self.config.budget.soft_repair_rounds {
            let reason = RepairReason::Quality(current_verdict.reason());
            let chain = rewrite.run(&self.repair_context(), &current, &reason).await;
            run.record_steps(attempt, &chain.steps);

            let rewritten = match chain.result {
                Ok(text) => text,
                Err(error) => {
                    run.last_error = Some(error.to_string());
                    continue;
                }
            };

            let verdict = self.score(&rewritten);
            run.trace.push(soft_event(attempt, &verdict));
            keep_better(&mut run.best, &rewritten, &verdict, limits);
            keep_better(&mut attempt_best, &rewritten, &verdict, limits);

            if verdict.is_clean_accept(limits) {
                return Some((rewritten, GenerationOutcome::SoftRepaired));
            }
            current = rewritten;
            current_verdict = verdict;
        }

        match attempt_best {
            Some(best) if best.verdict.state.coverage_complete() => {
                Some((best.text, GenerationOutcome::CoverageAccepted))
            }
            _ => {
                run.last_error = Some(format!("soft gate: {}", current_verdict.reason()));
                None
            }
        }
    }

    /// Attempts are spent: return the best hard-valid text seen, after one
    /// last try at moving it into the target band.
    async fn fall_back(
        &self,
        run: &mut RunState,
    ) -> Result<(String, GenerationOutcome), GenerationError> {
        let limits = self.limits();
        let attempts = run.draft_attempts;

        let Some(best) = run.best.take() else {
            return Err(GenerationError::GenerationExhausted {
                attempts,
                last_error: run
                    .last_error
                    .take()
                    .unwrap_or_else(|| "no draft produced".to_string()),
            });
        };

        if limits.in_target_band(best.verdict.state.word_count) {
            return Ok((
                best.text,
                GenerationOutcome::Fallback {
                    within_target: true,
                },
            ));
        }

        let micro = MicroRepair;
        let reason = RepairReason::WordCount {
            count: best.verdict.state.word_count,
        };
        let error = match micro.repair(&self.repair_context(), &best.text, &reason).await {
            Ok(candidate) => match validate_text(&candidate, self.role, limits) {
                Ok(()) => {
                    let verdict = self.score(&candidate);
                    if verdict.state.anchors_covered >= best.verdict.state.anchors_covered {
                        run.trace.push(GenerationEvent::RepairStep {
                            attempt: attempts,
                            strategy: micro.name().to_string(),
                            error: None,
                        });
                        let within_target = limits.in_target_band(verdict.state.word_count);
                        return Ok((candidate, GenerationOutcome::Fallback { within_target }));
                    }
                    "anchor coverage regressed".to_string()
                }
                Err(violation) => violation.to_string(),
            },
            Err(error) => error.to_string(),
        };

        run.trace.push(GenerationEvent::RepairStep {
            attempt: attempts,
            strategy: micro.name().to_string(),
            error: Some(error),
        });
        Ok((
            best.text,
            GenerationOutcome::Fallback {
                within_target: false,
            },
        ))
    }
}

fn soft_event(attempt: u32, verdict: &QualityVerdict) -> GenerationEvent {
    GenerationEvent::SoftVerdict {
        attempt,
        issues: verdict.issues.iter().map(ToString::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{ScriptedBackend, ScriptedReply};
    use crate::backend::traits::{CompletionResponse, LlmError};
    use crate::fixtures::{
        self, FUTURE_CLEAN, PAST_CLEAN, PAST_DISCOURAGED, PAST_UNCOVERED, PAST_UNCOVERED_SHORT,
    };
    use async_trait::async_trait;
    use canon::InMemoryCanonSource;
    use tokio_test::{assert_err, assert_ok};

    fn service(backend: &Arc<ScriptedBackend>) -> CardMessageService {
        let backend: Arc<dyn LlmBackend> = backend.clone();
        CardMessageService::new(vec![backend], Arc::new(fixtures::canon_store()))
    }

    fn scripted(texts: &[&str]) -> Arc<ScriptedBackend> {
        Arc::new(
            texts
                .iter()
                .fold(ScriptedBackend::default(), |backend, text| backend.with_text(text)),
        )
    }

    #[tokio::test]
    async fn test_clean_first_draft() {
        let backend = scripted(&[PAST_CLEAN]);
        let service = service(&backend);
        let request = fixtures::request("past-1");

        let result = assert_ok!(service.generate_card_message(request.clone()).await);

        assert_eq!(result.text, PAST_CLEAN);
        assert_eq!(result.outcome, GenerationOutcome::Clean);
        assert_eq!(result.key, ResultKey::for_request(&request));
        assert_eq!(result.cost.generator_calls, 1);
        assert_eq!(result.cost.draft_attempts, 1);
        assert!(result.cost.input_tokens > 0);

        let requests = backend.requests();
        assert_eq!(requests[0].temperature, Some(0.8));
        assert_eq!(requests[0].max_tokens, Some(600));
        assert!(requests[0]
            .system_prompt
            .as_deref()
            .is_some_and(|s| s.contains("## POSITION: PAST")));
    }

    #[tokio::test]
    async fn test_too_short_goes_to_micro_repair_before_new_draft() {
        let backend = scripted(&["too short", PAST_CLEAN]);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::LengthRepaired);
        assert_eq!(result.text, PAST_CLEAN);
        assert_eq!(result.cost.draft_attempts, 1);

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].user_content().contains("The passage below has 2 words"));
        assert_eq!(requests[1].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_length_repair_by_padding() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with_text(fixtures::PAST_SHORT)
                .with_error(LlmError::RateLimited {
                    retry_after_ms: None,
                }),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::LengthRepaired);
        assert_eq!(word_count(&result.text), 86);
        assert_eq!(result.cost.generator_calls, 2);
    }

    #[tokio::test]
    async fn test_extra_key_is_format_failure() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with_response(r#"{"text":"...","extra":1}"#)
                .with_text(PAST_CLEAN),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert_eq!(result.outcome, GenerationOutcome::Clean);
        assert_eq!(result.cost.draft_attempts, 2);
        assert_eq!(result.cost.generator_calls, 2);

        let entry = service.get_audit_log(1).await.remove(0);
        assert!(matches!(
            entry.events[0],
            GenerationEvent::DraftFailed { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_array_reply_is_format_failure() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with_response(serde_json::json!([PAST_CLEAN]).to_string())
                .with_text(PAST_CLEAN),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert_eq!(result.outcome, GenerationOutcome::Clean);
        assert_eq!(result.cost.draft_attempts, 2);
        assert_eq!(result.cost.generator_calls, 2);

        let entry = service.get_audit_log(1).await.remove(0);
        assert!(matches!(
            entry.events[0],
            GenerationEvent::DraftFailed { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_returned_text_is_trimmed() {
        let padded = format!("\n  {}  \n", PAST_CLEAN);
        let backend = Arc::new(
            ScriptedBackend::default()
                .with_response(serde_json::json!({ "text": padded }).to_string()),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert_eq!(result.outcome, GenerationOutcome::Clean);
        assert_eq!(result.text, PAST_CLEAN);
    }

    #[tokio::test]
    async fn test_hard_gate_failure_in_rewrite_round_is_not_fatal() {
        let backend = scripted(&[PAST_UNCOVERED, "Take this.", PAST_CLEAN]);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::SoftRepaired);
        assert_eq!(result.text, PAST_CLEAN);
        assert_eq!(result.cost.generator_calls, 3);
        assert_eq!(result.cost.draft_attempts, 1);
    }

    #[tokio::test]
    async fn test_soft_repair() {
        let backend = scripted(&[PAST_UNCOVERED, PAST_CLEAN]);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::SoftRepaired);
        assert_eq!(result.text, PAST_CLEAN);

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        let system = requests[1].system_prompt.clone().unwrap_or_default();
        assert!(system.contains("## REWRITE RULES"));
        assert!(requests[1].user_content().contains("anchor statements"));
        assert_eq!(requests[1].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn test_future_needs_conditional() {
        let backend = scripted(&[PAST_CLEAN, FUTURE_CLEAN]);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("future-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::SoftRepaired);
        assert_eq!(result.text, FUTURE_CLEAN);
    }

    #[tokio::test]
    async fn test_coverage_accepted_after_rounds() {
        let backend = Arc::new(
            ScriptedBackend::default().with_fallback(ScriptedReply::json_text(PAST_DISCOURAGED)),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(result.outcome, GenerationOutcome::CoverageAccepted);
        assert_eq!(result.text, PAST_DISCOURAGED);
        // One draft and two rewrite rounds.
        assert_eq!(result.cost.generator_calls, 3);
        assert_eq!(result.cost.draft_attempts, 1);
    }

    #[tokio::test]
    async fn test_fallback_within_target() {
        let backend = Arc::new(
            ScriptedBackend::default().with_fallback(ScriptedReply::json_text(PAST_UNCOVERED)),
        );
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(
            result.outcome,
            GenerationOutcome::Fallback {
                within_target: true
            }
        );
        assert!(result.outcome.is_flagged());
        assert_eq!(result.text, PAST_UNCOVERED);
        assert_eq!(result.cost.draft_attempts, 3);
        assert_eq!(result.cost.generator_calls, 9);
    }

    #[tokio::test]
    async fn test_fallback_micro_repairs_into_target() {
        let mut texts = vec![PAST_UNCOVERED_SHORT; 9];
        texts.push(PAST_UNCOVERED);
        let backend = scripted(&texts);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(
            result.outcome,
            GenerationOutcome::Fallback {
                within_target: true
            }
        );
        assert_eq!(result.text, PAST_UNCOVERED);
        assert_eq!(result.cost.generator_calls, 10);

        let requests = backend.requests();
        assert!(requests[9].user_content().contains("has 82 words"));

        let entry = service.get_audit_log(1).await.remove(0);
        let n = entry.events.len();
        assert!(matches!(
            &entry.events[n - 2],
            GenerationEvent::RepairStep { attempt: 3, strategy, error: None }
                if strategy == "micro_repair"
        ));
    }

    #[tokio::test]
    async fn test_fallback_outside_target_when_micro_fails() {
        let mut texts = vec![PAST_UNCOVERED_SHORT; 9];
        texts.push("not enough");
        let backend = scripted(&texts);
        let service = service(&backend);

        let result = assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        assert_eq!(
            result.outcome,
            GenerationOutcome::Fallback {
                within_target: false
            }
        );
        assert_eq!(result.text, PAST_UNCOVERED_SHORT);
    }

    #[tokio::test]
    async fn test_exhausted_on_transport_errors() {
        let backend = Arc::new(ScriptedBackend::default().with_fallback(ScriptedReply::Error(
            LlmError::NetworkError("connection refused".to_string()),
        )));
        let service = service(&backend);

        let err = assert_err!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );

        match err {
            GenerationError::GenerationExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.call_count(), 3);

        let stats = service.audit_log().stats().await;
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_imperative_drafts_are_not_repaired() {
        let coaching = format!("Embrace this. {}", PAST_CLEAN);
        let backend = Arc::new(
            ScriptedBackend::default().with_fallback(ScriptedReply::json_text(&coaching)),
        );
        let service = service(&backend);

        let err = assert_err!(
            service
                .generate_card_message(fixtures::request("present-1"))
                .await
        );

        assert!(err.to_string().contains("imperative"));
        assert!(!err.is_precondition());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_same_script_same_result() {
        let first = service(&scripted(&[PAST_UNCOVERED, PAST_CLEAN]))
            .generate_card_message(fixtures::request("past-1"))
            .await
            .unwrap();
        let second = service(&scripted(&[PAST_UNCOVERED, PAST_CLEAN]))
            .generate_card_message(fixtures::request("past-1"))
            .await
            .unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let backend = scripted(&[PAST_CLEAN]);
        let service = service(&backend);

        let err = assert_err!(
            service
                .generate_card_message(fixtures::request("middle-1"))
                .await
        );
        assert!(matches!(err, GenerationError::UnsupportedPosition(_)));
        assert!(err.is_precondition());

        let mut request = fixtures::request("past-1");
        request.card_id = "the-moon".to_string();
        let err = assert_err!(service.generate_card_message(request).await);
        assert!(matches!(err, GenerationError::Canon(CanonError::NotFound(_))));

        let mut request = fixtures::request("past-1");
        request.spread_id.clear();
        let err = assert_err!(service.generate_card_message(request).await);
        assert!(matches!(err, GenerationError::InvalidRequest(_)));

        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_canon_side() {
        let record = canon::CanonRecord::new(
            "the-fool",
            fixtures::tower_side(),
            canon::CanonSide::default(),
        );
        let backend: Arc<dyn LlmBackend> = scripted(&[PAST_CLEAN]);
        let service = CardMessageService::new(
            vec![backend],
            Arc::new(InMemoryCanonSource::with_records([record])),
        );

        let mut request = fixtures::request("past-1").with_reversed(true);
        request.card_id = "the-fool".to_string();
        let err = assert_err!(service.generate_card_message(request).await);
        assert!(matches!(err, GenerationError::Canon(CanonError::Empty { .. })));
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let backend = Arc::new(ScriptedBackend::default().with_available(false));
        let service = service(&backend);

        let err = assert_err!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert!(matches!(err, GenerationError::NoBackendAvailable));
    }

    #[tokio::test]
    async fn test_falls_through_to_available_backend() {
        let down: Arc<dyn LlmBackend> =
            Arc::new(ScriptedBackend::new("down").with_available(false));
        let up = scripted(&[PAST_CLEAN]);
        let up_dyn: Arc<dyn LlmBackend> = up.clone();
        let service =
            CardMessageService::new(vec![down, up_dyn], Arc::new(fixtures::canon_store()));

        assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert_eq!(up.call_count(), 1);
    }

    struct StalledBackend;

    #[async_trait]
    impl LlmBackend for StalledBackend {
        fn id(&self) -> &str {
            "stalled"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(CompletionResponse::stop(r#"{"text":"late"}"#))
        }
    }

    #[tokio::test]
    async fn test_deadline() {
        let mut config = GenerationConfig::default();
        config.budget.request_timeout_ms = 50;

        let backend: Arc<dyn LlmBackend> = Arc::new(StalledBackend);
        let service = CardMessageService::new(vec![backend], Arc::new(fixtures::canon_store()))
            .with_config(config)
            .unwrap();

        let err = assert_err!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        match err {
            GenerationError::GenerationExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert!(last_error.contains("deadline"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = GenerationConfig::default();
        config.budget.draft_attempts = 0;

        let backend = scripted(&[]);
        assert!(service(&backend).with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_audit_trail() {
        let backend = scripted(&["too short", PAST_CLEAN]);
        let service = service(&backend);
        let request = fixtures::request("past-1");

        assert_ok!(service.generate_card_message(request.clone()).await);

        let entries = service
            .audit_log()
            .get_by_key(&ResultKey::for_request(&request))
            .await;
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.outcome, Some(GenerationOutcome::LengthRepaired));
        assert_eq!(entry.cost.as_ref().map(|c| c.generator_calls), Some(2));
        assert_eq!(
            entry.events,
            vec![
                GenerationEvent::DraftProduced {
                    attempt: 1,
                    words: 2
                },
                GenerationEvent::HardGateFailed {
                    attempt: 1,
                    violation: "Word count 2 outside 75..=140".to_string()
                },
                GenerationEvent::RepairStep {
                    attempt: 1,
                    strategy: "micro_repair".to_string(),
                    error: None
                },
                GenerationEvent::Accepted {
                    outcome: GenerationOutcome::LengthRepaired,
                    words: 100
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_audit_disabled() {
        let mut config = GenerationConfig::default();
        config.audit_enabled = false;

        let backend = scripted(&[PAST_CLEAN]);
        let service = service(&backend).with_config(config).unwrap();

        assert_ok!(
            service
                .generate_card_message(fixtures::request("past-1"))
                .await
        );
        assert!(service.get_audit_log(10).await.is_empty());
    }
}
