//! Merge/apply capability: given original content and an edit sketch,
//! materialize the new file content. The production backend is a Morph-style
//! apply model behind the chat-completions wire shape.

use crate::errors::{ApplyError, TrialError};
use crate::limiter::{CallStats, GatedClient};
use crate::model::TokenUsage;
use crate::prompts;
use crate::providers::ModelParams;
use async_trait::async_trait;

/// Result of one merge call. `stats` carries any rate-limit wait incurred by
/// the apply model so the apply phase can be measured net of waiting.
#[derive(Debug, Clone)]
pub struct Merged {
    pub content: String,
    pub usage: TokenUsage,
    pub stats: CallStats,
}

#[async_trait]
pub trait MergeBackend: Send + Sync {
    async fn merge(
        &self,
        original: &str,
        instructions: &str,
        code_edit: &str,
    ) -> Result<Merged, TrialError>;
}

/// Morph apply model; same endpoint shape as any chat provider, so it shares
/// the gated-client plumbing (and its own rate limiter).
pub struct MorphMergeClient {
    client: GatedClient,
    params: ModelParams,
}

impl MorphMergeClient {
    pub fn new(client: GatedClient, apply_model_id: impl Into<String>) -> Self {
        Self {
            client,
            params: ModelParams::new(apply_model_id),
        }
    }
}

#[async_trait]
impl MergeBackend for MorphMergeClient {
    async fn merge(
        &self,
        original: &str,
        instructions: &str,
        code_edit: &str,
    ) -> Result<Merged, TrialError> {
        let message = prompts::morph_apply_message(instructions, original, code_edit);
        let (completion, stats) = self.client.complete(&message, &self.params).await?;
        if completion.text.trim().is_empty() {
            return Err(ApplyError::MergeConflict {
                detail: "apply model returned empty content".into(),
            }
            .into());
        }
        Ok(Merged {
            content: completion.text,
            usage: completion.usage,
            stats,
        })
    }
}
