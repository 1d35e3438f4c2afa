//! Search-and-replace strategy: the model emits old/new string pairs, the
//! replacement happens locally. A pattern that does not occur in the current
//! content is a `PatternNotFound` apply error, never a silent no-op.

use super::{extract_json_object, net_phase, EditMethod, Proposal, ProposeContext};
use crate::errors::{ApplyError, TrialError};
use crate::limiter::GatedClient;
use crate::model::{MethodKind, PhaseLabel};
use crate::prompts;
use crate::providers::ModelParams;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Clone, Deserialize)]
pub struct SrEdit {
    pub old_string: String,
    pub new_string: String,
}

#[derive(Debug, Deserialize)]
struct SrResponse {
    edits: Vec<SrEdit>,
}

pub struct SearchReplace {
    model: GatedClient,
    params: ModelParams,
}

impl SearchReplace {
    pub fn new(model: GatedClient, params: ModelParams) -> Self {
        Self { model, params }
    }
}

/// Apply edits in order; later edits see the results of earlier ones.
/// Each `old_string` must occur exactly once.
pub fn apply_edits(content: &str, edits: &[SrEdit]) -> Result<String, ApplyError> {
    let mut current = content.to_string();
    for edit in edits {
        match current.matches(&edit.old_string).count() {
            0 => return Err(ApplyError::pattern_not_found(&edit.old_string)),
            1 => current = current.replacen(&edit.old_string, &edit.new_string, 1),
            n => {
                return Err(ApplyError::MergeConflict {
                    detail: format!("search pattern occurs {n} times, must be unique"),
                })
            }
        }
    }
    Ok(current)
}

#[async_trait]
impl EditMethod for SearchReplace {
    fn kind(&self) -> MethodKind {
        MethodKind::SearchReplace
    }

    async fn propose(&self, ctx: &ProposeContext<'_>) -> Result<Proposal, TrialError> {
        let prompt = match ctx.context_block {
            None => prompts::sr_first_turn(ctx.file_name, ctx.current_content, ctx.instruction),
            Some(block) => prompts::sr_followup_turn(block, ctx.instruction),
        };

        let gen_started = Instant::now();
        let (completion, stats) = self.model.complete(&prompt, &self.params).await?;
        let gen_phase = net_phase(PhaseLabel::Generation, gen_started, &stats);

        let raw = extract_json_object(&completion.text)?;
        let parsed: SrResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ApplyError::MalformedEdit {
                detail: format!("invalid edits array: {e}"),
            })?;
        if parsed.edits.is_empty() {
            return Err(ApplyError::MalformedEdit {
                detail: "model returned no edits".into(),
            }
            .into());
        }

        // Local string rewrite; zero or near-zero apply time by construction.
        let apply_started = Instant::now();
        let new_content = apply_edits(ctx.current_content, &parsed.edits)?;
        let apply_phase = net_phase(PhaseLabel::Apply, apply_started, &Default::default());

        Ok(Proposal {
            new_content,
            usage: completion.usage,
            redundant_tokens: crate::tokens::redundant_in_sr_response(&raw),
            phases: vec![gen_phase, apply_phase],
            stats,
            raw_response: raw,
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

    fn edit(old: &str, new: &str) -> SrEdit {
        SrEdit {
            old_string: old.into(),
            new_string: new.into(),
        }
    }

    #[test]
    fn edits_apply_in_order() {
        let out = apply_edits("one two", &[edit("one", "1"), edit("1 two", "1 2")]).unwrap();
        assert_eq!(out, "1 2");
    }

    #[test]
    fn missing_pattern_is_pattern_not_found() {
        let err = apply_edits("abc", &[edit("zzz", "y")]).unwrap_err();
        assert!(matches!(err, ApplyError::PatternNotFound { .. }));
    }

    #[test]
    fn ambiguous_pattern_is_merge_conflict() {
        let err = apply_edits("x x", &[edit("x", "y")]).unwrap_err();
        assert!(matches!(err, ApplyError::MergeConflict { .. }));
    }

    fn method(reply: &str) -> SearchReplace {
        let client = GatedClient::new(
            Arc::new(FakeClient::new("fake").push_text(reply)),
            Arc::new(RateLimiter::unlimited("fake")),
            RetryPolicy::default(),
        );
        SearchReplace::new(client, ModelParams::new("m"))
    }

    fn ctx(content: &str) -> ProposeContext<'_> {
        ProposeContext {
            file_name: "day.tsx",
            current_content: content,
            instruction: "replace a with ab",
            mode: ComparisonMode::MultiTurn,
            iteration: 1,
            context_block: None,
        }
    }

    #[tokio::test]
    async fn proposes_via_local_rewrite() {
        let m = method(r#"{"edits": [{"old_string": "a", "new_string": "ab"}]}"#);
        let proposal = m.propose(&ctx("a")).await.expect("proposal");
        assert_eq!(proposal.new_content, "ab");
        assert_eq!(proposal.phases[0].label, PhaseLabel::Generation);
        assert_eq!(proposal.phases[1].label, PhaseLabel::Apply);
    }

    #[tokio::test]
    async fn stale_pattern_surfaces_as_apply_error() {
        let m = method(r#"{"edits": [{"old_string": "gone", "new_string": "x"}]}"#);
        let err = m.propose(&ctx("a")).await.expect_err("pattern not found");
        assert!(matches!(
            err,
            TrialError::Apply(ApplyError::PatternNotFound { .. })
        ));
    }
}
