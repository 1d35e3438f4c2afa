//! Flat per-trial CSV, one row per trial. Timing columns are the phase
//! buckets; `rate_limit_delay_ms` is its own column and is never folded
//! into the others.

use crate::report::BenchArtifacts;
use std::fmt::Write as _;
use std::path::Path;

const HEADER: &str = "trial_id,model,file,query_id,method,mode,status,iterations,\
total_tokens,redundant_tokens,time_generate_ms,time_apply_ms,time_verify_ms,context_overhead_ms,\
rate_limit_delay_ms,wall_time_ms,total_cost,retries,timestamp";

pub fn write_csv(artifacts: &BenchArtifacts, out: &Path) -> anyhow::Result<()> {
    let mut buf = String::with_capacity(artifacts.results.len() * 160 + HEADER.len());
    buf.push_str(HEADER);
    buf.push('\n');
    for r in &artifacts.results {
        let _ = writeln!(
            buf,
            "{},{},{},{},{},{},{},{},{},{},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.6},{},{}",
            escape(&r.trial_id),
            escape(&r.model),
            escape(&r.file),
            escape(&r.query_id),
            r.method.as_str(),
            r.mode.as_str(),
            r.status.as_str(),
            r.iterations.len(),
            r.total_tokens,
            r.redundant_tokens(),
            r.generation_ms(),
            r.apply_ms(),
            r.verification_ms(),
            r.context_overhead_ms(),
            r.rate_limit_delay_ms,
            r.wall_time_ms,
            r.total_cost,
            r.retries,
            r.finished_at.to_rfc3339(),
        );
    }
    std::fs::write(out, buf)?;
    Ok(())
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
