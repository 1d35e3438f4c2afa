//! Writes the final edited file content of each trial to disk so results
//! can be inspected with ordinary diff tools. One directory per trial,
//! keyed by a filesystem-safe form of the trial id.

use crate::report::BenchArtifacts;
use std::path::Path;

pub fn write_workspace(artifacts: &BenchArtifacts, out_dir: &Path) -> anyhow::Result<usize> {
    let root = out_dir.join("workspace");
    std::fs::create_dir_all(&root)?;
    let mut written = 0;
    for r in &artifacts.results {
        let Some(content) = &r.final_content else {
            continue;
        };
        let dir = root.join(sanitize(&r.trial_id));
        std::fs::create_dir_all(&dir)?;
        let file_name = Path::new(&r.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        std::fs::write(dir.join(file_name), content)?;
        written += 1;
    }
    Ok(written)
}

/// Trial ids contain `::` and corpus paths; flatten to one path segment.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
