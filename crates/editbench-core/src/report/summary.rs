//! Aggregated per model and method, plus the morph-versus-other comparison
//! ratios. All timing averages are built from the phase buckets, so
//! rate-limit delay never leaks into them; it is totalled separately.

use crate::model::{MethodKind, TrialStatus};
use crate::report::BenchArtifacts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodSummary {
    pub trials: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub avg_iterations: f64,
    pub avg_generation_ms: f64,
    pub avg_apply_ms: f64,
    pub avg_verification_ms: f64,
    pub avg_context_overhead_ms: f64,
    /// Average of the per-trial phase sums, excluding rate-limit delay.
    pub avg_performance_ms: f64,
    pub avg_tokens: f64,
    /// Average tokens spent re-stating content the file already held.
    pub avg_redundant_tokens: f64,
    pub total_cost: f64,
    pub total_rate_limit_delay_ms: f64,
    pub total_retries: u32,
}

/// How the alternative method compares to morph for one model.
/// Ratios above 1.0 mean morph was faster / cheaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub other_method: MethodKind,
    /// other avg performance / morph avg performance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_ratio: Option<f64>,
    /// other avg tokens / morph avg tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ratio: Option<f64>,
    /// other avg redundant tokens / morph avg redundant tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redundant_tokens_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub methods: BTreeMap<String, MethodSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total_trials: usize,
    pub models: Vec<ModelSummary>,
}

pub fn summarize(artifacts: &BenchArtifacts) -> RunSummary {
    // (model, method) -> rows
    let mut groups: BTreeMap<(String, MethodKind), Vec<&crate::model::TrialResult>> =
        BTreeMap::new();
    for r in &artifacts.results {
        groups
            .entry((r.model.clone(), r.method))
            .or_default()
            .push(r);
    }

    let mut per_model: BTreeMap<String, BTreeMap<String, MethodSummary>> = BTreeMap::new();
    let mut raw: BTreeMap<(String, MethodKind), MethodSummary> = BTreeMap::new();
    for ((model, method), rows) in groups {
        let n = rows.len();
        let successes = rows
            .iter()
            .filter(|r| r.status == TrialStatus::Success)
            .count();
        let nf = n as f64;
        let avg = |f: &dyn Fn(&crate::model::TrialResult) -> f64| {
            rows.iter().map(|r| f(r)).sum::<f64>() / nf
        };
        let s = MethodSummary {
            trials: n,
            successes,
            success_rate: successes as f64 / nf,
            avg_iterations: avg(&|r| r.iterations.len() as f64),
            avg_generation_ms: avg(&|r| r.generation_ms()),
            avg_apply_ms: avg(&|r| r.apply_ms()),
            avg_verification_ms: avg(&|r| r.verification_ms()),
            avg_context_overhead_ms: avg(&|r| r.context_overhead_ms()),
            avg_performance_ms: avg(&|r| r.performance_ms()),
            avg_tokens: avg(&|r| r.total_tokens as f64),
            avg_redundant_tokens: avg(&|r| r.redundant_tokens() as f64),
            total_cost: rows.iter().map(|r| r.total_cost).sum(),
            total_rate_limit_delay_ms: rows.iter().map(|r| r.rate_limit_delay_ms).sum(),
            total_retries: rows.iter().map(|r| r.retries).sum(),
        };
        per_model
            .entry(model.clone())
            .or_default()
            .insert(method.as_str().to_string(), s.clone());
        raw.insert((model, method), s);
    }

    let other_method = artifacts.mode.method_pair()[1];
    let models = per_model
        .into_iter()
        .map(|(model, methods)| {
            let morph = raw.get(&(model.clone(), MethodKind::Morph));
            let other = raw.get(&(model.clone(), other_method));
            let comparison = match (morph, other) {
                (Some(m), Some(o)) => Some(Comparison {
                    other_method,
                    speed_ratio: ratio(o.avg_performance_ms, m.avg_performance_ms),
                    token_ratio: ratio(o.avg_tokens, m.avg_tokens),
                    redundant_tokens_ratio: ratio(o.avg_redundant_tokens, m.avg_redundant_tokens),
                }),
                _ => None,
            };
            ModelSummary {
                model,
                methods,
                comparison,
            }
        })
        .collect();

    RunSummary {
        run_id: artifacts.run_id.clone(),
        total_trials: artifacts.results.len(),
        models,
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

pub fn write_summary(summary: &RunSummary, out: &Path) -> anyhow::Result<()> {
    std::fs::write(out, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

/// Human-readable comparison table for stdout.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run {} — {} trials", summary.run_id, summary.total_trials);
    for m in &summary.models {
        let _ = writeln!(out, "\n{}", m.model);
        for (method, s) in &m.methods {
            let _ = writeln!(
                out,
                "  {:<22} success {:>5.1}%  avg {:>8.1} ms  avg {:>7.0} tok  iters {:.1}",
                method,
                s.success_rate * 100.0,
                s.avg_performance_ms,
                s.avg_tokens,
                s.avg_iterations,
            );
        }
        if let Some(c) = &m.comparison {
            if let Some(r) = c.speed_ratio {
                let _ = writeln!(
                    out,
                    "  morph is {:.2}x {} than {} (time)",
                    if r >= 1.0 { r } else { 1.0 / r },
                    if r >= 1.0 { "faster" } else { "slower" },
                    c.other_method.as_str(),
                );
            }
            if let Some(r) = c.token_ratio {
                let _ = writeln!(
                    out,
                    "  morph uses {:.2}x {} tokens than {}",
                    if r >= 1.0 { r } else { 1.0 / r },
                    if r >= 1.0 { "fewer" } else { "more" },
                    c.other_method.as_str(),
                );
            }
        }
    }
    out
}
