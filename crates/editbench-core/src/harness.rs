//! Wires configuration to live clients: one HTTP client and one limiter
//! per provider, shared by every worker that talks to that provider, plus
//! the method resolver and judge the scheduler needs.

use crate::config::BenchConfig;
use crate::limiter::{GatedClient, RateLimiter, RetryPolicy};
use crate::merge::{MergeBackend, MorphMergeClient};
use crate::methods::{full_file::FullFileGeneration, morph::MorphApply, search_replace::SearchReplace, EditMethod};
use crate::model::MethodKind;
use crate::providers::{openai::OpenAiCompatClient, ModelParams};
use crate::scheduler::MethodResolver;
use crate::verify::{LlmJudge, Verifier};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Harness {
    clients: HashMap<String, GatedClient>,
    merge: Arc<dyn MergeBackend>,
    judge: Arc<dyn Verifier>,
}

impl Harness {
    /// Resolve API keys from the environment and build per-provider clients.
    /// Fails fast on a missing key rather than erroring mid-run.
    pub fn from_config(config: &BenchConfig) -> Result<Self> {
        let mut clients = HashMap::new();
        for (name, pc) in &config.providers {
            let api_key = std::env::var(&pc.api_key_env).with_context(|| {
                format!("provider '{name}': environment variable {} not set", pc.api_key_env)
            })?;
            let limiter = match pc.requests_per_minute {
                Some(rpm) => Arc::new(RateLimiter::per_minute(name.clone(), rpm)),
                None => Arc::new(RateLimiter::unlimited(name.clone())),
            };
            let inner = Arc::new(OpenAiCompatClient::new(name.clone(), pc.base_url.clone(), api_key));
            clients.insert(
                name.clone(),
                GatedClient::new(inner, limiter, RetryPolicy::default()),
            );
        }

        // validate() guarantees these providers exist.
        let merge_client = clients
            .get(&config.morph.provider)
            .context("morph provider missing after validation")?
            .clone();
        let judge_client = clients
            .get(&config.judge.provider)
            .context("judge provider missing after validation")?
            .clone();

        Ok(Self {
            clients,
            merge: Arc::new(MorphMergeClient::new(merge_client, config.morph.model_id.clone())),
            judge: Arc::new(LlmJudge::new(judge_client, config.judge.model_id.clone())),
        })
    }

    pub fn verifier(&self) -> Arc<dyn Verifier> {
        self.judge.clone()
    }

    pub fn resolver(self: &Arc<Self>) -> Arc<dyn MethodResolver> {
        Arc::new(HarnessResolver {
            harness: self.clone(),
        })
    }

    fn client(&self, provider: &str) -> GatedClient {
        // Unreachable for validated configs; a panic here is a wiring bug.
        self.clients[provider].clone()
    }
}

struct HarnessResolver {
    harness: Arc<Harness>,
}

impl MethodResolver for HarnessResolver {
    fn resolve(&self, spec: &crate::model::TrialSpec) -> Arc<dyn EditMethod> {
        let client = self.harness.client(&spec.model.provider);
        let params = ModelParams::new(spec.model.model_id.clone());
        match spec.method {
            MethodKind::Morph => Arc::new(MorphApply::new(
                client,
                params,
                self.harness.merge.clone(),
            )),
            MethodKind::FullFileGeneration => Arc::new(FullFileGeneration::new(client, params)),
            MethodKind::SearchReplace => Arc::new(SearchReplace::new(client, params)),
        }
    }
}
