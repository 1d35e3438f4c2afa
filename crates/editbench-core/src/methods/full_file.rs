//! Full-file regeneration: the model rewrites the entire file in one
//! generation phase. There is no separate merge step, so the apply phase is
//! emitted with zero duration for schema uniformity.

use super::{net_phase, strip_code_fence, EditMethod, Proposal, ProposeContext};
use crate::errors::{ApplyError, TrialError};
use crate::limiter::GatedClient;
use crate::model::{MethodKind, PhaseLabel, PhaseTiming};
use crate::prompts;
use crate::providers::ModelParams;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;

pub struct FullFileGeneration {
    model: GatedClient,
    params: ModelParams,
}

impl FullFileGeneration {
    pub fn new(model: GatedClient, params: ModelParams) -> Self {
        Self { model, params }
    }
}

#[async_trait]
impl EditMethod for FullFileGeneration {
    fn kind(&self) -> MethodKind {
        MethodKind::FullFileGeneration
    }

    async fn propose(&self, ctx: &ProposeContext<'_>) -> Result<Proposal, TrialError> {
        let prompt = prompts::full_file(ctx.current_content, ctx.instruction);

        let gen_started = Instant::now();
        let (completion, stats) = self.model.complete(&prompt, &self.params).await?;
        let gen_phase = net_phase(PhaseLabel::Generation, gen_started, &stats);

        let new_content = strip_code_fence(&completion.text).to_string();
        if new_content.is_empty() {
            return Err(ApplyError::MalformedEdit {
                detail: "model returned an empty file".into(),
            }
            .into());
        }

        let mut truncated: String = completion.text.chars().take(500).collect();
        if truncated.len() < completion.text.len() {
            truncated.push_str("...");
        }

        Ok(Proposal {
            redundant_tokens: crate::tokens::redundant_in_full_file(
                &new_content,
                ctx.current_content,
            ),
            new_content,
            usage: completion.usage,
            phases: vec![
                gen_phase,
                PhaseTiming::new(PhaseLabel::Apply, Utc::now(), 0.0),
            ],
            stats,
            raw_response: serde_json::json!({ "full_file_output": truncated }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{RateLimiter, RetryPolicy};
    use crate::model::ComparisonMode;
    use crate::providers::fake::FakeClient;
    use std::sync::Arc;

    fn method(reply: &str) -> FullFileGeneration {
        let client = GatedClient::new(
            Arc::new(FakeClient::new("fake").push_text(reply)),
            Arc::new(RateLimiter::unlimited("fake")),
            RetryPolicy::default(),
        );
        FullFileGeneration::new(client, ModelParams::new("m"))
    }

    #[tokio::test]
    async fn regenerates_whole_file_with_zero_apply_phase() {
        let m = method("```tsx\nab\n```");
        let proposal = m
            .propose(&ProposeContext {
                file_name: "day.tsx",
                current_content: "a",
                instruction: "append b",
                mode: ComparisonMode::SingleTurn,
                iteration: 1,
                context_block: None,
            })
            .await
            .expect("proposal");
        assert_eq!(proposal.new_content, "ab");
        assert_eq!(proposal.phases[1].label, PhaseLabel::Apply);
        assert_eq!(proposal.phases[1].duration_ms, 0.0);
    }
}
