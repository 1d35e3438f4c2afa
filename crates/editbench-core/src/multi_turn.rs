//! Multi-turn edit/verify loop for one trial.
//!
//! Explicit state machine, `Editing -> Verifying -> {Editing | Done}`,
//! bounded by `max_iterations` so termination is provable by construction.
//! Strictly sequential within a trial; concurrency lives in the scheduler.

use crate::errors::{TrialError, TrialTimeout};
use crate::limiter::CallStats;
use crate::methods::{EditMethod, ProposeContext};
use crate::model::{
    content_sha256, ComparisonMode, IterationRecord, PhaseLabel, PhaseTiming, TokenUsage,
    TrialStatus,
};
use crate::prompts;
use crate::verify::Verifier;
use chrono::Utc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Editing,
    Verifying,
    Done(TrialStatus),
}

/// Everything the loop produced for one trial.
#[derive(Debug)]
pub struct LoopOutcome {
    pub status: TrialStatus,
    pub iterations: Vec<IterationRecord>,
    pub final_content: String,
    pub error: Option<String>,
    pub stats: CallStats,
}

pub struct MultiTurnController<'a> {
    method: &'a dyn EditMethod,
    verifier: &'a dyn Verifier,
    max_iterations: u32,
    deadline: Option<tokio::time::Instant>,
}

impl<'a> MultiTurnController<'a> {
    pub fn new(
        method: &'a dyn EditMethod,
        verifier: &'a dyn Verifier,
        max_iterations: u32,
        deadline: Option<tokio::time::Instant>,
    ) -> Self {
        Self {
            method,
            verifier,
            max_iterations: max_iterations.max(1),
            deadline,
        }
    }

    /// Cooperative cancellation point, checked between phases and iterations.
    /// An in-flight provider call always finishes or fails on its own terms.
    fn past_deadline(&self) -> bool {
        self.deadline
            .is_some_and(|d| tokio::time::Instant::now() >= d)
    }

    pub async fn run(&self, file_name: &str, original: &str, instruction: &str) -> LoopOutcome {
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut current = original.to_string();
        let mut stats = CallStats::default();
        let mut error: Option<String> = None;

        let mut iteration: u32 = 1;
        let mut phases: Vec<PhaseTiming> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut redundant: u64 = 0;
        let mut state = TurnState::Editing;

        let status = loop {
            match state {
                TurnState::Editing => {
                    if self.past_deadline() {
                        error = Some(TrialTimeout.to_string());
                        state = TurnState::Done(TrialStatus::Timeout);
                        continue;
                    }

                    // Re-serializing file state for follow-up turns is its
                    // own bucket, distinct from generation.
                    let context_block = if iteration > 1 {
                        let started = Instant::now();
                        let block = prompts::followup_context_block(file_name, &current);
                        phases.push(PhaseTiming::new(
                            PhaseLabel::ContextOverhead,
                            Utc::now(),
                            started.elapsed().as_secs_f64() * 1000.0,
                        ));
                        Some(block)
                    } else {
                        None
                    };

                    let ctx = ProposeContext {
                        file_name,
                        current_content: &current,
                        instruction,
                        mode: ComparisonMode::MultiTurn,
                        iteration,
                        context_block: context_block.as_deref(),
                    };

                    match self.method.propose(&ctx).await {
                        Ok(proposal) => {
                            phases.extend(proposal.phases);
                            usage.accumulate(proposal.usage);
                            redundant += proposal.redundant_tokens;
                            stats.accumulate(proposal.stats);
                            current = proposal.new_content;
                            state = TurnState::Verifying;
                        }
                        Err(e) if e.is_recoverable_iteration() => {
                            // An apply failure consumes one iteration slot;
                            // the next turn may recover.
                            tracing::debug!(iteration, "apply failed, consuming iteration: {e}");
                            iterations.push(IterationRecord {
                                iteration,
                                content_sha256: content_sha256(&current),
                                usage: std::mem::take(&mut usage),
                                redundant_tokens: std::mem::take(&mut redundant),
                                verified: None,
                                phases: std::mem::take(&mut phases),
                                finished_at: Utc::now(),
                                error: Some(e.to_string()),
                            });
                            if iteration >= self.max_iterations {
                                error = Some(e.to_string());
                                state = TurnState::Done(TrialStatus::Error);
                            } else {
                                iteration += 1;
                            }
                        }
                        Err(e) => {
                            iterations.push(IterationRecord {
                                iteration,
                                content_sha256: content_sha256(&current),
                                usage: std::mem::take(&mut usage),
                                redundant_tokens: std::mem::take(&mut redundant),
                                verified: None,
                                phases: std::mem::take(&mut phases),
                                finished_at: Utc::now(),
                                error: Some(e.to_string()),
                            });
                            error = Some(e.to_string());
                            let terminal = match e {
                                TrialError::Timeout(_) => TrialStatus::Timeout,
                                _ => TrialStatus::Error,
                            };
                            state = TurnState::Done(terminal);
                        }
                    }
                }

                TurnState::Verifying => {
                    if self.past_deadline() {
                        iterations.push(IterationRecord {
                            iteration,
                            content_sha256: content_sha256(&current),
                            usage: std::mem::take(&mut usage),
                            redundant_tokens: std::mem::take(&mut redundant),
                            verified: None,
                            phases: std::mem::take(&mut phases),
                            finished_at: Utc::now(),
                            error: None,
                        });
                        error = Some(TrialTimeout.to_string());
                        state = TurnState::Done(TrialStatus::Timeout);
                        continue;
                    }

                    match self.verifier.verify(original, &current, instruction).await {
                        Ok(verdict) => {
                            phases.push(PhaseTiming::new(
                                PhaseLabel::Verification,
                                Utc::now(),
                                verdict.duration_ms,
                            ));
                            // Judge tokens belong to the iteration they verified.
                            usage.accumulate(verdict.usage);
                            stats.accumulate(verdict.stats);
                            iterations.push(IterationRecord {
                                iteration,
                                content_sha256: content_sha256(&current),
                                usage: std::mem::take(&mut usage),
                                redundant_tokens: std::mem::take(&mut redundant),
                                verified: Some(verdict.satisfied),
                                phases: std::mem::take(&mut phases),
                                finished_at: Utc::now(),
                                error: None,
                            });
                            if verdict.satisfied {
                                state = TurnState::Done(TrialStatus::Success);
                            } else if iteration >= self.max_iterations {
                                state = TurnState::Done(TrialStatus::VerificationFailed);
                            } else {
                                iteration += 1;
                                state = TurnState::Editing;
                            }
                        }
                        Err(e) => {
                            iterations.push(IterationRecord {
                                iteration,
                                content_sha256: content_sha256(&current),
                                usage: std::mem::take(&mut usage),
                                redundant_tokens: std::mem::take(&mut redundant),
                                verified: None,
                                phases: std::mem::take(&mut phases),
                                finished_at: Utc::now(),
                                error: Some(e.to_string()),
                            });
                            error = Some(e.to_string());
                            state = TurnState::Done(TrialStatus::Error);
                        }
                    }
                }

                TurnState::Done(status) => break status,
            }
        };

        LoopOutcome {
            status,
            iterations,
            final_content: current,
            error,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ApplyError, ProviderError, VerificationError};
    use crate::methods::Proposal;
    use crate::model::MethodKind;
    use crate::verify::Verdict;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted method: plays back one propose outcome per iteration.
    struct ScriptedMethod {
        outcomes: Mutex<Vec<Result<String, TrialError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedMethod {
        fn new(outcomes: Vec<Result<String, TrialError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EditMethod for ScriptedMethod {
        fn kind(&self) -> MethodKind {
            MethodKind::SearchReplace
        }

        async fn propose(&self, _ctx: &ProposeContext<'_>) -> Result<Proposal, TrialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcomes.lock().unwrap()[n].clone();
            outcome.map(|content| Proposal {
                new_content: content,
                usage: TokenUsage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                },
                phases: vec![
                    PhaseTiming::new(PhaseLabel::Generation, Utc::now(), 10.0),
                    PhaseTiming::new(PhaseLabel::Apply, Utc::now(), 1.0),
                ],
                stats: CallStats::default(),
                raw_response: serde_json::json!({}),
                redundant_tokens: 3,
            })
        }
    }

    /// Scripted verifier: a fixed sequence of verdicts or failures.
    struct ScriptedVerifier {
        verdicts: Mutex<Vec<Result<bool, VerificationError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedVerifier {
        fn new(verdicts: Vec<Result<bool, VerificationError>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(
            &self,
            _original: &str,
            _current: &str,
            _instruction: &str,
        ) -> Result<Verdict, VerificationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdicts.lock().unwrap()[n]
                .clone()
                .map(|satisfied| Verdict {
                    satisfied,
                    duration_ms: 2.0,
                    usage: TokenUsage {
                        prompt_tokens: 2,
                        completion_tokens: 1,
                    },
                    stats: CallStats::default(),
                })
        }
    }

    async fn run(
        method: &ScriptedMethod,
        verifier: &ScriptedVerifier,
        max_iterations: u32,
    ) -> LoopOutcome {
        MultiTurnController::new(method, verifier, max_iterations, None)
            .run("day.tsx", "a", "append b")
            .await
    }

    #[tokio::test]
    async fn satisfied_on_third_verify_uses_three_iterations() {
        let method = ScriptedMethod::new(vec![
            Ok("ab".into()),
            Ok("ab2".into()),
            Ok("ab3".into()),
        ]);
        let verifier = ScriptedVerifier::new(vec![Ok(false), Ok(false), Ok(true)]);
        let outcome = run(&method, &verifier, 3).await;

        assert_eq!(outcome.status, TrialStatus::Success);
        assert_eq!(outcome.iterations.len(), 3);
        for (i, record) in outcome.iterations.iter().enumerate() {
            assert_eq!(record.iteration as usize, i + 1);
        }
        assert_eq!(outcome.iterations[2].verified, Some(true));
        assert_eq!(outcome.final_content, "ab3");
    }

    #[tokio::test]
    async fn never_satisfied_exhausts_budget_as_verification_failed() {
        let method = ScriptedMethod::new(vec![Ok("ab".into()), Ok("ab2".into())]);
        let verifier = ScriptedVerifier::new(vec![Ok(false), Ok(false)]);
        let outcome = run(&method, &verifier, 2).await;

        assert_eq!(outcome.status, TrialStatus::VerificationFailed);
        assert_eq!(outcome.iterations.len(), 2);
        assert_eq!(outcome.iterations[1].verified, Some(false));
    }

    #[tokio::test]
    async fn apply_error_consumes_iteration_then_recovers() {
        let method = ScriptedMethod::new(vec![
            Err(ApplyError::pattern_not_found("gone").into()),
            Ok("ab".into()),
        ]);
        let verifier = ScriptedVerifier::new(vec![Ok(true)]);
        let outcome = run(&method, &verifier, 3).await;

        assert_eq!(outcome.status, TrialStatus::Success);
        assert_eq!(outcome.iterations.len(), 2);
        assert!(outcome.iterations[0].error.is_some());
        assert_eq!(outcome.iterations[0].verified, None);
        assert_eq!(outcome.iterations[1].verified, Some(true));
    }

    #[tokio::test]
    async fn apply_error_on_final_iteration_is_terminal_error() {
        let method = ScriptedMethod::new(vec![
            Err(ApplyError::pattern_not_found("x").into()),
            Err(ApplyError::pattern_not_found("y").into()),
        ]);
        let verifier = ScriptedVerifier::new(vec![]);
        let outcome = run(&method, &verifier, 2).await;

        assert_eq!(outcome.status, TrialStatus::Error);
        assert_eq!(outcome.iterations.len(), 2);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn provider_error_aborts_immediately() {
        let method = ScriptedMethod::new(vec![Err(ProviderError::Fatal {
            provider: "p".into(),
            detail: "down".into(),
        }
        .into())]);
        let verifier = ScriptedVerifier::new(vec![]);
        let outcome = run(&method, &verifier, 5).await;

        assert_eq!(outcome.status, TrialStatus::Error);
        assert_eq!(outcome.iterations.len(), 1);
    }

    #[tokio::test]
    async fn verifier_failure_is_terminal_error() {
        let method = ScriptedMethod::new(vec![Ok("ab".into())]);
        let verifier =
            ScriptedVerifier::new(vec![Err(VerificationError::new("judge unreachable"))]);
        let outcome = run(&method, &verifier, 3).await;

        assert_eq!(outcome.status, TrialStatus::Error);
        assert_eq!(outcome.iterations.len(), 1);
        assert_eq!(outcome.iterations[0].verified, None);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_times_out_between_iterations() {
        let method = ScriptedMethod::new(vec![Ok("ab".into()), Ok("ab2".into())]);
        let verifier = ScriptedVerifier::new(vec![Ok(false), Ok(false)]);
        // Deadline already in the past: the first Editing check trips.
        let deadline = tokio::time::Instant::now();
        tokio::time::advance(std::time::Duration::from_millis(1)).await;
        let outcome = MultiTurnController::new(&method, &verifier, 3, Some(deadline))
            .run("day.tsx", "a", "append b")
            .await;

        assert_eq!(outcome.status, TrialStatus::Timeout);
        assert!(outcome.iterations.is_empty());
    }

    #[tokio::test]
    async fn judge_usage_is_charged_to_the_verified_iteration() {
        let method = ScriptedMethod::new(vec![Ok("ab".into()), Ok("ab2".into())]);
        let verifier = ScriptedVerifier::new(vec![Ok(false), Ok(true)]);
        let outcome = run(&method, &verifier, 2).await;

        assert_eq!(outcome.status, TrialStatus::Success);
        // Each iteration: 10 method tokens plus the judge's 3.
        for record in &outcome.iterations {
            assert_eq!(record.usage.total(), 13);
            assert_eq!(record.redundant_tokens, 3);
        }
    }

    #[tokio::test]
    async fn every_iteration_is_timestamped_in_order() {
        let method = ScriptedMethod::new(vec![
            Err(ApplyError::pattern_not_found("gone").into()),
            Ok("ab".into()),
        ]);
        let verifier = ScriptedVerifier::new(vec![Ok(true)]);
        let before = Utc::now();
        let outcome = run(&method, &verifier, 3).await;

        // Errored records get a timestamp too, and stamps never go backwards.
        assert_eq!(outcome.iterations.len(), 2);
        assert!(outcome.iterations[0].error.is_some());
        for pair in outcome.iterations.windows(2) {
            assert!(pair[0].finished_at <= pair[1].finished_at);
        }
        assert!(outcome.iterations[0].finished_at >= before);
    }

    #[tokio::test]
    async fn iteration_count_never_exceeds_budget() {
        let method = ScriptedMethod::new(vec![
            Ok("1".into()),
            Ok("2".into()),
            Ok("3".into()),
            Ok("4".into()),
        ]);
        let verifier =
            ScriptedVerifier::new(vec![Ok(false), Ok(false), Ok(false), Ok(false)]);
        let outcome = run(&method, &verifier, 3).await;
        assert_eq!(outcome.iterations.len(), 3);
        assert_eq!(outcome.status, TrialStatus::VerificationFailed);
    }
}
