//! OpenAI-compatible chat-completions client. Covers both regular model
//! endpoints and Morph-style apply endpoints, which speak the same wire
//! shape behind a different base URL.

use super::{Completion, ModelClient, ModelParams};
use crate::errors::ProviderError;
use crate::model::TokenUsage;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct OpenAiCompatClient {
    provider: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn transient(&self, detail: impl Into<String>) -> ProviderError {
        ProviderError::Transient {
            provider: self.provider.clone(),
            detail: detail.into(),
        }
    }

    fn fatal(&self, detail: impl Into<String>) -> ProviderError {
        ProviderError::Fatal {
            provider: self.provider.clone(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": params.model_id,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": params.max_tokens,
        });
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited {
                provider: self.provider.clone(),
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(self.transient(format!("server error: {status}")));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(self.fatal(format!("{status}: {detail}")));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.transient(format!("invalid response body: {e}")))?;

        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| self.transient("response missing message content"))?
            .to_string();

        let usage = match v.get("usage") {
            Some(u) => TokenUsage {
                prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
            },
            None => TokenUsage::estimate_completion(&text),
        };

        Ok(Completion { text, usage })
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}
