//! Full detail log: every trial with its per-iteration records and phase
//! timings, for offline analysis. The CSV is the flat view; this is the
//! complete one.

use crate::report::BenchArtifacts;
use std::path::Path;

pub fn write_json(artifacts: &BenchArtifacts, out: &Path) -> anyhow::Result<()> {
    let v = serde_json::json!({
        "run_id": artifacts.run_id,
        "mode": artifacts.mode,
        "started_at": artifacts.started_at,
        "results": artifacts.results,
    });
    std::fs::write(out, serde_json::to_string_pretty(&v)?)?;
    Ok(())
}
