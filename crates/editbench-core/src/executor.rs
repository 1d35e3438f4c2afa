//! Runs one trial end to end and assembles the immutable `TrialResult`.
//! Failures never escape: every downstream error is converted into a
//! terminal status here, so one trial can never abort its siblings.

use crate::errors::{TrialError, TrialTimeout};
use crate::limiter::CallStats;
use crate::methods::{EditMethod, ProposeContext};
use crate::model::{
    content_sha256, ComparisonMode, IterationRecord, TokenUsage, TrialResult, TrialSpec,
    TrialStatus,
};
use crate::multi_turn::MultiTurnController;
use crate::verify::Verifier;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub struct TrialExecutor {
    method: Arc<dyn EditMethod>,
    verifier: Arc<dyn Verifier>,
    max_iterations: u32,
    deadline: Option<tokio::time::Instant>,
}

impl TrialExecutor {
    pub fn new(
        method: Arc<dyn EditMethod>,
        verifier: Arc<dyn Verifier>,
        max_iterations: u32,
        deadline: Option<tokio::time::Instant>,
    ) -> Self {
        Self {
            method,
            verifier,
            max_iterations,
            deadline,
        }
    }

    /// Infallible by design: errors become result rows, not propagated
    /// failures.
    pub async fn run(&self, spec: &TrialSpec) -> TrialResult {
        let wall_started = Instant::now();

        let (status, iterations, final_content, error, stats) = match spec.mode {
            ComparisonMode::SingleTurn => self.run_single_turn(spec).await,
            ComparisonMode::MultiTurn => {
                let controller = MultiTurnController::new(
                    self.method.as_ref(),
                    self.verifier.as_ref(),
                    self.max_iterations,
                    self.deadline,
                );
                let outcome = controller
                    .run(&spec.file.name, &spec.file.content, &spec.query.prompt)
                    .await;
                (
                    outcome.status,
                    outcome.iterations,
                    Some(outcome.final_content),
                    outcome.error,
                    outcome.stats,
                )
            }
        };

        let total_usage = iterations.iter().fold(TokenUsage::default(), |mut acc, it| {
            acc.accumulate(it.usage);
            acc
        });
        let total_tokens = total_usage.total();
        let total_cost = spec
            .model
            .cost_per_1k_tokens
            .map_or(0.0, |rate| rate * (total_tokens as f64) / 1000.0);

        TrialResult {
            trial_id: spec.trial_id(),
            model: spec.model.name.clone(),
            file: spec.file.path.clone(),
            query_id: spec.query.id.clone(),
            method: spec.method,
            mode: spec.mode,
            status,
            iterations,
            total_tokens,
            total_cost,
            wall_time_ms: wall_started.elapsed().as_secs_f64() * 1000.0,
            rate_limit_delay_ms: stats.rate_limit_delay_ms,
            retries: stats.retries,
            final_content,
            error,
            finished_at: Utc::now(),
        }
    }

    /// One edit attempt, no verification loop. Success means the apply step
    /// itself succeeded.
    async fn run_single_turn(
        &self,
        spec: &TrialSpec,
    ) -> (
        TrialStatus,
        Vec<IterationRecord>,
        Option<String>,
        Option<String>,
        CallStats,
    ) {
        if self
            .deadline
            .is_some_and(|d| tokio::time::Instant::now() >= d)
        {
            return (
                TrialStatus::Timeout,
                Vec::new(),
                None,
                Some(TrialTimeout.to_string()),
                CallStats::default(),
            );
        }

        let ctx = ProposeContext {
            file_name: &spec.file.name,
            current_content: &spec.file.content,
            instruction: &spec.query.prompt,
            mode: ComparisonMode::SingleTurn,
            iteration: 1,
            context_block: None,
        };

        match self.method.propose(&ctx).await {
            Ok(proposal) => {
                let record = IterationRecord {
                    iteration: 1,
                    content_sha256: content_sha256(&proposal.new_content),
                    usage: proposal.usage,
                    redundant_tokens: proposal.redundant_tokens,
                    verified: None,
                    phases: proposal.phases,
                    finished_at: Utc::now(),
                    error: None,
                };
                (
                    TrialStatus::Success,
                    vec![record],
                    Some(proposal.new_content),
                    None,
                    proposal.stats,
                )
            }
            Err(e) => {
                let status = match e {
                    TrialError::Timeout(_) => TrialStatus::Timeout,
                    _ => TrialStatus::Error,
                };
                let record = IterationRecord {
                    iteration: 1,
                    content_sha256: content_sha256(&spec.file.content),
                    usage: TokenUsage::default(),
                    redundant_tokens: 0,
                    verified: None,
                    phases: Vec::new(),
                    finished_at: Utc::now(),
                    error: Some(e.to_string()),
                };
                (status, vec![record], None, Some(e.to_string()), CallStats::default())
            }
        }
    }
}
