//! Edit method capability: propose new file content for an instruction.
//!
//! Three strategies, one contract. Each `propose` reports its phase timings
//! net of rate-limit waits; the waits travel separately in `CallStats`.

pub mod full_file;
pub mod morph;
pub mod search_replace;

use crate::errors::{ApplyError, TrialError};
use crate::limiter::CallStats;
use crate::model::{ComparisonMode, MethodKind, PhaseLabel, PhaseTiming, TokenUsage};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;

/// Inputs for one propose step. For multi-turn follow-ups the controller
/// supplies a pre-built `context_block` with the re-uploaded file state.
#[derive(Debug, Clone, Copy)]
pub struct ProposeContext<'a> {
    pub file_name: &'a str,
    pub current_content: &'a str,
    pub instruction: &'a str,
    pub mode: ComparisonMode,
    /// 1-based; 1 means first turn.
    pub iteration: u32,
    pub context_block: Option<&'a str>,
}

/// One proposed revision of the file.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub new_content: String,
    pub usage: TokenUsage,
    /// Estimated tokens spent re-stating content the file already held.
    pub redundant_tokens: u64,
    pub phases: Vec<PhaseTiming>,
    pub stats: CallStats,
    /// Raw edit representation for the detailed log.
    pub raw_response: serde_json::Value,
}

#[async_trait]
pub trait EditMethod: Send + Sync {
    fn kind(&self) -> MethodKind;

    async fn propose(&self, ctx: &ProposeContext<'_>) -> Result<Proposal, TrialError>;
}

/// Measure a phase net of rate-limit waits incurred inside it.
pub(crate) fn net_phase(label: PhaseLabel, started: Instant, stats: &CallStats) -> PhaseTiming {
    let gross = started.elapsed().as_secs_f64() * 1000.0;
    PhaseTiming::new(label, Utc::now(), (gross - stats.rate_limit_delay_ms).max(0.0))
}

/// Pull the JSON object out of a model reply, tolerating prose or code
/// fences around it.
pub(crate) fn extract_json_object(text: &str) -> Result<serde_json::Value, ApplyError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ApplyError::MalformedEdit {
            detail: "no JSON object in model response".into(),
        });
    };
    if end < start {
        return Err(ApplyError::MalformedEdit {
            detail: "unbalanced JSON object in model response".into(),
        });
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| ApplyError::MalformedEdit {
        detail: format!("invalid edit JSON: {e}"),
    })
}

/// Remove a wrapping markdown code fence, if present.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.strip_suffix("```").map_or(body, str::trim_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_prose() {
        let v = extract_json_object("Sure thing:\n```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn missing_json_is_malformed_edit() {
        let err = extract_json_object("no edit here").unwrap_err();
        assert!(matches!(err, ApplyError::MalformedEdit { .. }));
    }

    #[test]
    fn strips_fence_with_language_tag() {
        let out = strip_code_fence("```tsx\nconst x = 1;\n```");
        assert_eq!(out, "const x = 1;");
    }

    #[test]
    fn unfenced_text_passes_through() {
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }
}
