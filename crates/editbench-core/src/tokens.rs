//! Token estimation, including the redundant-token analysis: how many
//! tokens a method spent re-stating content that was already in the file.
//! Morph pays for its lazy-edit markers and JSON envelope, search/replace
//! for the repeated search context, full-file regeneration for every
//! unchanged line it reproduces.

use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

/// ~4 chars per token, the usual rough cut for code-heavy text.
pub fn estimate(text: &str) -> u64 {
    (text.len() / 4) as u64
}

fn existing_code_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"//\s*\.\.\.\s*existing\s+code\s*\.\.\.").unwrap()
    })
}

/// Redundant tokens in a morph lazy edit: the `// ... existing code ...`
/// markers plus the JSON envelope around the edit payload.
pub fn redundant_in_morph_edit(edit: &serde_json::Value) -> u64 {
    let code_edit = edit["code_edit"].as_str().unwrap_or_default();
    let instructions = edit["instructions"].as_str().unwrap_or_default();

    let marker_text: String = existing_code_marker()
        .find_iter(code_edit)
        .map(|m| m.as_str())
        .collect();
    let envelope = json!({ "instructions": instructions, "code_edit": "" }).to_string();

    estimate(&marker_text) + estimate(&envelope)
}

/// Redundant tokens in a search/replace response: every `old_string` is
/// context the file already held, and lines a replacement repeats
/// verbatim (modulo whitespace) are counted once more, plus the JSON
/// structure overhead.
pub fn redundant_in_sr_response(response: &serde_json::Value) -> u64 {
    let edits = match response["edits"].as_array() {
        Some(edits) => edits,
        None => return 0,
    };

    let mut redundant = 0;
    for edit in edits {
        let old = edit["old_string"].as_str().unwrap_or_default();
        let new = edit["new_string"].as_str().unwrap_or_default();
        redundant += estimate(old);

        let old_lines: Vec<&str> = old.split('\n').collect();
        let new_lines: Vec<&str> = new.split('\n').collect();
        let common = old_lines
            .iter()
            .zip(&new_lines)
            .filter(|(o, n)| o.trim() == n.trim())
            .count();
        if common > 0 {
            redundant += estimate(&new_lines[..common].join("\n"));
        }
    }

    let structure = json!({ "edits": [{ "old_string": "", "new_string": "" }] }).to_string();
    redundant + estimate(&structure)
}

/// Redundant tokens in a regenerated file: the lines reproduced unchanged
/// (modulo whitespace) from the original.
pub fn redundant_in_full_file(new_content: &str, original: &str) -> u64 {
    let unchanged: Vec<&str> = original
        .split('\n')
        .zip(new_content.split('\n'))
        .filter(|(o, n)| o.trim() == n.trim())
        .map(|(_, n)| n)
        .collect();
    if unchanged.is_empty() {
        0
    } else {
        estimate(&unchanged.join("\n"))
    }
}
