//! Model capability: generate text given a prompt and parameters, return
//! text plus token usage, or fail with a classified `ProviderError`.
//! Concrete backends live behind `ModelClient`; the core never branches on
//! provider names.

pub mod fake;
pub mod openai;

use crate::errors::ProviderError;
use crate::model::TokenUsage;
use async_trait::async_trait;

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl ModelParams {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            max_tokens: 10_000,
            temperature: Some(0.0),
        }
    }
}

/// One completed generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Completion, ProviderError>;

    fn provider_name(&self) -> &str;
}
