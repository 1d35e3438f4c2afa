//! Error taxonomy for the orchestration engine.
//!
//! `ProviderError` comes from the model capability, `ApplyError` from an edit
//! method, `VerificationError` from a verifier that failed to run (distinct
//! from a clean "not satisfied" verdict). `TrialError` is the union the
//! executor and controller propagate internally; it never crosses the
//! scheduler boundary — the executor converts it into a terminal status.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// HTTP 429 class. Fully absorbed by the retry policy; surfaces only
    /// when the retry budget is exhausted.
    #[error("rate limited by provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Recoverable provider trouble: 5xx, transport failure, malformed body.
    #[error("transient provider error from '{provider}': {detail}")]
    Transient { provider: String, detail: String },

    /// Not worth retrying: auth failure, bad request, model not found.
    #[error("fatal provider error from '{provider}': {detail}")]
    Fatal { provider: String, detail: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::RateLimited { provider, .. }
            | ProviderError::Transient { provider, .. }
            | ProviderError::Fatal { provider, .. } => provider,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    /// A requested search pattern does not occur in the current content.
    /// Never a silent no-op.
    #[error("search pattern not found in file: {pattern:?}")]
    PatternNotFound { pattern: String },

    /// The model response could not be parsed into an edit representation.
    #[error("malformed edit: {detail}")]
    MalformedEdit { detail: String },

    /// The edit could not be applied unambiguously.
    #[error("merge conflict: {detail}")]
    MergeConflict { detail: String },
}

impl ApplyError {
    pub fn pattern_not_found(pattern: &str) -> Self {
        // Keep the record readable when the model sends a whole file section.
        let mut p = pattern.chars().take(120).collect::<String>();
        if p.len() < pattern.len() {
            p.push('…');
        }
        ApplyError::PatternNotFound { pattern: p }
    }
}

/// The verifier itself failed to produce a verdict.
#[derive(Debug, Clone, Error)]
#[error("verifier failed: {detail}")]
pub struct VerificationError {
    pub detail: String,
}

impl VerificationError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// The global deadline elapsed while this trial was in flight.
#[derive(Debug, Clone, Copy, Error)]
#[error("trial deadline exceeded")]
pub struct TrialTimeout;

/// Union error propagated inside one trial.
#[derive(Debug, Clone, Error)]
pub enum TrialError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Timeout(#[from] TrialTimeout),
}

impl TrialError {
    /// Apply errors consume an iteration slot in multi-turn mode instead of
    /// aborting the trial; everything else is terminal.
    pub fn is_recoverable_iteration(&self) -> bool {
        matches!(self, TrialError::Apply(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_not_found_truncates_long_patterns() {
        let long = "x".repeat(500);
        let err = ApplyError::pattern_not_found(&long);
        match err {
            ApplyError::PatternNotFound { pattern } => {
                assert!(pattern.chars().count() <= 121);
                assert!(pattern.ends_with('…'));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn only_apply_errors_are_recoverable() {
        let apply: TrialError = ApplyError::pattern_not_found("a").into();
        assert!(apply.is_recoverable_iteration());
        let provider: TrialError = ProviderError::Fatal {
            provider: "p".into(),
            detail: "nope".into(),
        }
        .into();
        assert!(!provider.is_recoverable_iteration());
        let timeout: TrialError = TrialTimeout.into();
        assert!(!timeout.is_recoverable_iteration());
    }
}
