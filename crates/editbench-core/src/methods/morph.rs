//! Intelligent-merge strategy: the model sketches a lazy edit with
//! `// ... existing code ...` markers, a separate apply model materializes
//! the full file. Two measured phases: generation, then apply.

use super::{extract_json_object, net_phase, EditMethod, Proposal, ProposeContext};
use crate::errors::{ApplyError, TrialError};
use crate::limiter::GatedClient;
use crate::merge::MergeBackend;
use crate::model::{ComparisonMode, MethodKind, PhaseLabel};
use crate::prompts;
use crate::providers::ModelParams;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

pub struct MorphApply {
    model: GatedClient,
    params: ModelParams,
    merge: Arc<dyn MergeBackend>,
}

impl MorphApply {
    pub fn new(model: GatedClient, params: ModelParams, merge: Arc<dyn MergeBackend>) -> Self {
        Self {
            model,
            params,
            merge,
        }
    }

    fn prompt(&self, ctx: &ProposeContext<'_>) -> String {
        match (ctx.mode, ctx.context_block) {
            (ComparisonMode::SingleTurn, _) => {
                prompts::morph_single_turn(ctx.file_name, ctx.current_content, ctx.instruction)
            }
            (ComparisonMode::MultiTurn, None) => {
                prompts::morph_first_turn(ctx.file_name, ctx.current_content, ctx.instruction)
            }
            (ComparisonMode::MultiTurn, Some(block)) => {
                prompts::morph_followup_turn(block, ctx.instruction)
            }
        }
    }
}

#[async_trait]
impl EditMethod for MorphApply {
    fn kind(&self) -> MethodKind {
        MethodKind::Morph
    }

    async fn propose(&self, ctx: &ProposeContext<'_>) -> Result<Proposal, TrialError> {
        let prompt = self.prompt(ctx);

        let gen_started = Instant::now();
        let (completion, gen_stats) = self.model.complete(&prompt, &self.params).await?;
        let gen_phase = net_phase(PhaseLabel::Generation, gen_started, &gen_stats);

        let edit = extract_json_object(&completion.text)?;
        let instructions = edit["instructions"].as_str().unwrap_or_default();
        let code_edit = edit["code_edit"]
            .as_str()
            .ok_or_else(|| ApplyError::MalformedEdit {
                detail: "edit object missing code_edit".into(),
            })?;

        let apply_started = Instant::now();
        let merged = self
            .merge
            .merge(ctx.current_content, instructions, code_edit)
            .await?;
        let apply_phase = net_phase(PhaseLabel::Apply, apply_started, &merged.stats);

        let mut usage = completion.usage;
        usage.accumulate(merged.usage);
        let mut stats = gen_stats;
        stats.accumulate(merged.stats);

        Ok(Proposal {
            new_content: merged.content,
            usage,
            redundant_tokens: crate::tokens::redundant_in_morph_edit(&edit),
            phases: vec![gen_phase, apply_phase],
            stats,
            raw_response: edit,
        })
    }
}
