//! Scripted in-memory client for tests and dry runs. Pops one pre-canned
//! outcome per call, in order; repeats the last outcome once the script is
//! exhausted.

use super::{Completion, ModelClient, ModelParams};
use crate::errors::ProviderError;
use crate::model::TokenUsage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeClient {
    name: String,
    script: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    last: Mutex<Option<Result<Completion, ProviderError>>>,
    calls: AtomicUsize,
}

impl FakeClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_text(self, text: impl Into<String>) -> Self {
        let text = text.into();
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: (text.len() / 4) as u64,
        };
        self.push(Ok(Completion { text, usage }))
    }

    pub fn push_rate_limited(self) -> Self {
        let err = ProviderError::RateLimited {
            provider: self.name.clone(),
            retry_after: None,
        };
        self.push(Err(err))
    }

    pub fn push_transient(self, detail: impl Into<String>) -> Self {
        let err = ProviderError::Transient {
            provider: self.name.clone(),
            detail: detail.into(),
        };
        self.push(Err(err))
    }

    pub fn push_fatal(self, detail: impl Into<String>) -> Self {
        let err = ProviderError::Fatal {
            provider: self.name.clone(),
            detail: detail.into(),
        };
        self.push(Err(err))
    }

    fn push(self, outcome: Result<Completion, ProviderError>) -> Self {
        self.script.lock().expect("script lock").push_back(outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for FakeClient {
    async fn complete(
        &self,
        _prompt: &str,
        _params: &ModelParams,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(outcome) => {
                *self.last.lock().expect("last lock") = Some(outcome.clone());
                outcome
            }
            None => self
                .last
                .lock()
                .expect("last lock")
                .clone()
                .unwrap_or_else(|| {
                    Err(ProviderError::Fatal {
                        provider: self.name.clone(),
                        detail: "fake script exhausted".into(),
                    })
                }),
        }
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
