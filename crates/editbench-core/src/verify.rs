//! Verification step: an external pass/fail check of whether the current
//! content satisfies the original instruction. Only multi-turn trials invoke
//! it. A verifier that fails to run is a `VerificationError`, distinct from
//! a clean "not satisfied" verdict.

use crate::errors::VerificationError;
use crate::limiter::{CallStats, GatedClient};
use crate::model::TokenUsage;
use crate::prompts;
use crate::providers::ModelParams;
use async_trait::async_trait;
use similar::TextDiff;
use std::time::Instant;

/// Outcome of one verification pass.
#[derive(Debug, Clone, Copy)]
pub struct Verdict {
    pub satisfied: bool,
    /// Net of rate-limit waits.
    pub duration_ms: f64,
    /// Tokens the judge spent; charged to the iteration it verified.
    pub usage: TokenUsage,
    pub stats: CallStats,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        original: &str,
        current: &str,
        instruction: &str,
    ) -> Result<Verdict, VerificationError>;
}

/// Judge diffs can be huge for full-file regeneration; keep head and tail.
const MAX_DIFF_LINES: usize = 500;

pub fn unified_diff(original: &str, current: &str) -> String {
    let diff = TextDiff::from_lines(original, current);
    let text = diff
        .unified_diff()
        .context_radius(3)
        .header("original", "updated")
        .to_string();

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= MAX_DIFF_LINES {
        return text;
    }
    let half = MAX_DIFF_LINES / 2;
    format!(
        "{}\n\n... [diff truncated - {} lines omitted] ...\n\n{}",
        lines[..half].join("\n"),
        lines.len() - MAX_DIFF_LINES,
        lines[lines.len() - half..].join("\n")
    )
}

/// LLM judge: show both versions plus the unified diff, expect a single
/// leading TRUE/FALSE token back.
pub struct LlmJudge {
    client: GatedClient,
    params: ModelParams,
}

impl LlmJudge {
    pub fn new(client: GatedClient, model_id: impl Into<String>) -> Self {
        let mut params = ModelParams::new(model_id);
        params.max_tokens = 1000;
        Self { client, params }
    }
}

#[async_trait]
impl Verifier for LlmJudge {
    async fn verify(
        &self,
        original: &str,
        current: &str,
        instruction: &str,
    ) -> Result<Verdict, VerificationError> {
        let diff = unified_diff(original, current);
        let prompt = prompts::judgment(original, current, &diff, instruction);

        let started = Instant::now();
        let (completion, stats) = self
            .client
            .complete(&prompt, &self.params)
            .await
            .map_err(|e| VerificationError::new(format!("judge call failed: {e}")))?;
        let gross_ms = started.elapsed().as_secs_f64() * 1000.0;

        let verdict = completion.text.trim().to_ascii_lowercase();
        if !(verdict.starts_with("true") || verdict.starts_with("false")) {
            return Err(VerificationError::new(format!(
                "judge returned neither TRUE nor FALSE: {:?}",
                completion.text.chars().take(80).collect::<String>()
            )));
        }

        Ok(Verdict {
            satisfied: verdict.starts_with("true"),
            duration_ms: (gross_ms - stats.rate_limit_delay_ms).max(0.0),
            usage: completion.usage,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{RateLimiter, RetryPolicy};
    use crate::providers::fake::FakeClient;
    use std::sync::Arc;

    fn judge(reply: &str) -> LlmJudge {
        let client = GatedClient::new(
            Arc::new(FakeClient::new("judge").push_text(reply)),
            Arc::new(RateLimiter::unlimited("judge")),
            RetryPolicy::default(),
        );
        LlmJudge::new(client, "judge-model")
    }

    #[tokio::test]
    async fn parses_true_and_false_verdicts() {
        let v = judge("TRUE").verify("a", "ab", "append b").await.unwrap();
        assert!(v.satisfied);
        let v = judge("FALSE\n").verify("a", "a", "append b").await.unwrap();
        assert!(!v.satisfied);
    }

    #[tokio::test]
    async fn judge_token_usage_travels_with_the_verdict() {
        let v = judge("TRUE").verify("a", "ab", "append b").await.unwrap();
        assert!(v.usage.total() > 0, "judge call tokens must be reported");
    }

    #[tokio::test]
    async fn garbled_verdict_is_verification_error() {
        let err = judge("maybe?")
            .verify("a", "ab", "append b")
            .await
            .expect_err("garbled");
        assert!(err.detail.contains("neither"));
    }

    #[test]
    fn long_diffs_are_truncated_keeping_both_ends() {
        let original: String = (0..2000).map(|i| format!("line {i}\n")).collect();
        let current: String = (0..2000).map(|i| format!("row {i}\n")).collect();
        let diff = unified_diff(&original, &current);
        assert!(diff.contains("diff truncated"));
        assert!(diff.lines().count() < 520);
    }
}
