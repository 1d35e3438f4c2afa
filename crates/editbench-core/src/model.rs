//! Core data model: trial specs, phase timings, iteration records and
//! terminal results. A `TrialResult` is written exactly once by the worker
//! that owns the trial and never mutated afterwards; that single-writer rule
//! is what keeps concurrent aggregation lock-free on the result objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Which pair of edit methods a run compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// One edit attempt per method, no verification loop (morph vs full file).
    SingleTurn,
    /// Repeated edit/verify cycles up to `max_iterations` (morph vs S&R).
    MultiTurn,
}

impl ComparisonMode {
    /// The two methods compared in this mode, in report order.
    pub fn method_pair(self) -> [MethodKind; 2] {
        match self {
            ComparisonMode::SingleTurn => {
                [MethodKind::Morph, MethodKind::FullFileGeneration]
            }
            ComparisonMode::MultiTurn => [MethodKind::Morph, MethodKind::SearchReplace],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonMode::SingleTurn => "single_turn",
            ComparisonMode::MultiTurn => "multi_turn",
        }
    }
}

/// Strategy used to turn an edit instruction into new file content.
/// Ordered so it can key the per-method report maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Morph,
    FullFileGeneration,
    SearchReplace,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Morph => "morph",
            MethodKind::FullFileGeneration => "full_file_generation",
            MethodKind::SearchReplace => "search_replace",
        }
    }
}

/// One model under test. `name` is the human label used in reports,
/// `model_id` the provider-side identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub model_id: String,
    pub provider: String,
    /// Optional USD cost per 1k output tokens; trials report cost 0 without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k_tokens: Option<f64>,
}

/// A corpus file already loaded into memory. Shared read-only across trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusFile {
    /// Path relative to the corpus root, used as the report key.
    pub path: String,
    /// Base name shown to models in prompts.
    pub name: String,
    pub content: String,
}

/// One natural-language edit request against a corpus file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub prompt: String,
}

/// Immutable description of one unit of work. Uniquely identified by
/// (model, file, query, method); constructed once by the scheduler and
/// owned by a single worker for its entire lifetime.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    pub model: ModelSpec,
    pub file: Arc<CorpusFile>,
    pub query: Query,
    pub mode: ComparisonMode,
    pub method: MethodKind,
}

impl TrialSpec {
    /// Stable identifier used for deterministic result ordering and report keys.
    pub fn trial_id(&self) -> String {
        format!(
            "{}::{}::{}::{}",
            self.model.name,
            self.file.path,
            self.query.id,
            self.method.as_str()
        )
    }
}

/// Timing bucket labels. `RateLimitDelay` is excluded from performance
/// aggregates by contract but always reported for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLabel {
    Generation,
    Apply,
    Verification,
    ContextOverhead,
    RateLimitDelay,
}

/// One measured phase inside a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub label: PhaseLabel,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
}

impl PhaseTiming {
    pub fn new(label: PhaseLabel, started_at: DateTime<Utc>, duration_ms: f64) -> Self {
        Self {
            label,
            started_at,
            duration_ms,
        }
    }
}

/// Token usage for one provider call, as reported by the provider or
/// estimated from text length when the provider omits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    /// Rough fallback when a provider reports no usage block.
    pub fn estimate_completion(text: &str) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: crate::tokens::estimate(text),
        }
    }
}

/// Record of one edit/verify cycle. Content is retained as a sha256 hash,
/// not a full snapshot, to bound memory on long trials; the final content
/// lives on the `TrialResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based.
    pub iteration: u32,
    pub content_sha256: String,
    pub usage: TokenUsage,
    /// Estimated tokens the method spent re-stating unchanged content
    /// (lazy-edit markers, repeated search context, regenerated lines).
    pub redundant_tokens: u64,
    /// `None` until verification ran (single-turn trials, errored iterations).
    pub verified: Option<bool>,
    pub phases: Vec<PhaseTiming>,
    /// When the record was sealed. Monotone within a trial, including for
    /// errored iterations that carry no phase timings.
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn content_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Terminal status of a trial. Set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Success,
    VerificationFailed,
    Error,
    Timeout,
}

impl TrialStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrialStatus::Success => "success",
            TrialStatus::VerificationFailed => "verification_failed",
            TrialStatus::Error => "error",
            TrialStatus::Timeout => "timeout",
        }
    }
}

/// Immutable outcome of one trial. Created once, appended to the collector
/// exactly once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: String,
    pub model: String,
    pub file: String,
    pub query_id: String,
    pub method: MethodKind,
    pub mode: ComparisonMode,
    pub status: TrialStatus,
    pub iterations: Vec<IterationRecord>,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// End-to-end wall time including rate-limit waits.
    pub wall_time_ms: f64,
    /// Time spent blocked on limiter admission or backoff. Reported
    /// separately; never folded into the phase buckets below.
    pub rate_limit_delay_ms: f64,
    /// Provider retries observed across the whole trial (diagnostics).
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TrialResult {
    fn phase_sum(&self, label: PhaseLabel) -> f64 {
        self.iterations
            .iter()
            .flat_map(|it| it.phases.iter())
            .filter(|p| p.label == label)
            .map(|p| p.duration_ms)
            .sum()
    }

    pub fn generation_ms(&self) -> f64 {
        self.phase_sum(PhaseLabel::Generation)
    }

    pub fn apply_ms(&self) -> f64 {
        self.phase_sum(PhaseLabel::Apply)
    }

    pub fn verification_ms(&self) -> f64 {
        self.phase_sum(PhaseLabel::Verification)
    }

    pub fn context_overhead_ms(&self) -> f64 {
        self.phase_sum(PhaseLabel::ContextOverhead)
    }

    pub fn redundant_tokens(&self) -> u64 {
        self.iterations.iter().map(|it| it.redundant_tokens).sum()
    }

    /// Sum of all phase buckets except rate-limit delay. Always bounded above
    /// by `wall_time_ms - rate_limit_delay_ms` (modulo clock granularity).
    pub fn performance_ms(&self) -> f64 {
        self.generation_ms() + self.apply_ms() + self.verification_ms() + self.context_overhead_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_pair_follows_mode() {
        assert_eq!(
            ComparisonMode::SingleTurn.method_pair(),
            [MethodKind::Morph, MethodKind::FullFileGeneration]
        );
        assert_eq!(
            ComparisonMode::MultiTurn.method_pair(),
            [MethodKind::Morph, MethodKind::SearchReplace]
        );
    }

    #[test]
    fn trial_id_is_stable_and_unique_per_method() {
        let file = Arc::new(CorpusFile {
            path: "corpus/day.tsx".into(),
            name: "day.tsx".into(),
            content: "x".into(),
        });
        let spec = |method| TrialSpec {
            model: ModelSpec {
                name: "sonnet".into(),
                model_id: "claude-sonnet".into(),
                provider: "anthropic".into(),
                cost_per_1k_tokens: None,
            },
            file: file.clone(),
            query: Query {
                id: "q1".into(),
                prompt: "do it".into(),
            },
            mode: ComparisonMode::SingleTurn,
            method,
        };
        let a = spec(MethodKind::Morph).trial_id();
        let b = spec(MethodKind::FullFileGeneration).trial_id();
        assert_ne!(a, b);
        assert_eq!(a, spec(MethodKind::Morph).trial_id());
    }

    #[test]
    fn method_kind_is_orderable_for_report_keys() {
        use std::collections::BTreeMap;
        let mut by_method: BTreeMap<(String, MethodKind), u32> = BTreeMap::new();
        by_method.insert(("m".into(), MethodKind::SearchReplace), 1);
        by_method.insert(("m".into(), MethodKind::Morph), 2);
        let kinds: Vec<MethodKind> = by_method.keys().map(|(_, k)| *k).collect();
        assert_eq!(kinds, vec![MethodKind::Morph, MethodKind::SearchReplace]);
    }

    #[test]
    fn usage_estimate_is_len_over_four() {
        let u = TokenUsage::estimate_completion("abcdefgh");
        assert_eq!(u.total(), 2);
    }

    #[test]
    fn phase_sums_skip_other_labels() {
        let now = Utc::now();
        let result = TrialResult {
            trial_id: "t".into(),
            model: "m".into(),
            file: "f".into(),
            query_id: "q".into(),
            method: MethodKind::Morph,
            mode: ComparisonMode::SingleTurn,
            status: TrialStatus::Success,
            iterations: vec![IterationRecord {
                iteration: 1,
                content_sha256: content_sha256("x"),
                usage: TokenUsage::default(),
                redundant_tokens: 9,
                verified: None,
                phases: vec![
                    PhaseTiming::new(PhaseLabel::Generation, now, 120.0),
                    PhaseTiming::new(PhaseLabel::Apply, now, 30.0),
                ],
                finished_at: now,
                error: None,
            }],
            total_tokens: 0,
            total_cost: 0.0,
            wall_time_ms: 200.0,
            rate_limit_delay_ms: 40.0,
            retries: 1,
            final_content: None,
            error: None,
            finished_at: now,
        };
        assert_eq!(result.generation_ms(), 120.0);
        assert_eq!(result.apply_ms(), 30.0);
        assert_eq!(result.redundant_tokens(), 9);
        assert_eq!(result.performance_ms(), 150.0);
        assert!(result.wall_time_ms - result.rate_limit_delay_ms >= result.performance_ms());
    }
}
