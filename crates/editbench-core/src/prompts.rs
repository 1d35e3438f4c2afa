//! Prompt builders for the three edit methods, the multi-turn follow-ups and
//! the judge. Methods parse the model reply as a JSON object, so every
//! prompt pins down the exact shape expected back.

const MORPH_EDIT_GUIDE: &str = "Respond with a single JSON object of the form \
{\"instructions\": \"...\", \"code_edit\": \"...\"} and nothing else.\n\
`instructions` is one first-person sentence describing the edit, used to help \
a less intelligent apply model.\n\
`code_edit` contains ONLY the precise lines you wish to change. Represent all \
unchanged code with the comment `// ... existing code ...`. Include minimally \
sufficient unchanged context around each edit to resolve ambiguity, and never \
omit a span of pre-existing code without the existing-code comment. Make all \
edits in this single object.";

const SR_EDIT_GUIDE: &str = "Respond with a single JSON object of the form \
{\"edits\": [{\"old_string\": \"...\", \"new_string\": \"...\"}]} and nothing \
else. Each `old_string` must occur exactly once in the current file and \
include enough surrounding context to be unique. Edits are applied in order, \
so later edits see the results of earlier ones.";

pub fn morph_single_turn(file_name: &str, content: &str, query: &str) -> String {
    format!(
        "Make the required changes. You must provide ALL edits in a single \
         response. The file will NOT be shown to you again, do not look for \
         confirmation or ask clarifications.\n{MORPH_EDIT_GUIDE}\n\n\
         Instruction: {query}\n\nfile name: {file_name}\n\nfile content:\n{content}"
    )
}

pub fn morph_first_turn(file_name: &str, content: &str, query: &str) -> String {
    format!(
        "You will produce a comprehensive edit to satisfy the user's prompt.\n\
         Aim to make all edits required to satisfy the request in one go; the \
         file will be shown to you again for further edits regardless.\n\
         {MORPH_EDIT_GUIDE}\n\nUser prompt: {query}\n\nfile name: {file_name}\n\n\
         File content:\n{content}"
    )
}

pub fn morph_followup_turn(context_block: &str, query: &str) -> String {
    format!(
        "The previous edit did not fully satisfy the user's prompt. Make the \
         further edits that are necessary.\n{MORPH_EDIT_GUIDE}\n\n\
         User prompt (unchanged): {query}\n\n{context_block}"
    )
}

pub fn full_file(content: &str, query: &str) -> String {
    format!(
        "You are given a file and a user request to modify it.\n\
         Your task is to output the COMPLETE file with the requested changes applied.\n\n\
         CRITICAL INSTRUCTIONS:\n\
         1. Output the ENTIRE file - do not skip or abbreviate any sections\n\
         2. Do not use ellipsis (...) or placeholders like 'rest of code unchanged'\n\
         3. Apply ONLY the changes requested by the user\n\
         4. Preserve all functionality that is not related to the user's request\n\
         5. Maintain the exact same formatting, style, and structure except where changes are needed\n\
         6. If a section is unrelated to the user's request, it must remain EXACTLY as it was\n\n\
         User request: {query}\n\nOriginal file content:\n{content}\n\n\
         Output the complete modified file below:"
    )
}

pub fn sr_first_turn(file_name: &str, content: &str, query: &str) -> String {
    format!(
        "Apply the following edit request to the provided file.\n\
         Plan to satisfy the prompt with the minimum number of edits.\n\
         {SR_EDIT_GUIDE}\n\nUser prompt: {query}\n\nfile name: {file_name}\n\n\
         File content:\n{content}"
    )
}

pub fn sr_followup_turn(context_block: &str, query: &str) -> String {
    format!(
        "The previous edits did not fully satisfy the user's prompt. Continue \
         applying edits.\n{SR_EDIT_GUIDE}\n\n\
         User prompt (unchanged): {query}\n\n{context_block}"
    )
}

/// Framing for re-uploaded file state on follow-up turns. Built by the
/// multi-turn controller so the re-serialization cost lands in its own
/// timing bucket.
pub fn followup_context_block(file_name: &str, current_content: &str) -> String {
    format!("Here is the updated file.\n\nfile name: {file_name}\n\nFile content:\n{current_content}")
}

/// Morph apply-model message, `<instruction>/<code>/<update>` wire shape.
pub fn morph_apply_message(instructions: &str, original: &str, code_edit: &str) -> String {
    format!(
        "<instruction>{instructions}</instruction>\n<code>{original}</code>\n<update>{code_edit}</update>"
    )
}

/// TRUE/FALSE judgment prompt. The judge sees both file versions plus a
/// unified diff; instructions disambiguate when the diff alone is unclear.
pub fn judgment(original: &str, updated: &str, unified_diff: &str, instruction: &str) -> String {
    format!(
        "You are an expert code reviewer and judge.\n\n\
         Your task: Decide if a patch (shown as a unified diff) has been applied \
         **correctly** to the original code and produced the updated code.\n\
         Use the **Update Instructions** only when the diff location or intent is ambiguous.\n\n\
         Output format:\n\
         Return ONLY one word on a single line:\n\
         TRUE  - if the update is correct.\n\
         FALSE - otherwise.\n\
         No additional text.\n\n\
         Inputs\n\
         ------\n\
         UPDATE INSTRUCTIONS (for clarification only):\n{instruction}\n\n\
         ORIGINAL CODE:\n```\n{original}\n```\n\n\
         UPDATED CODE:\n```\n{updated}\n```\n\n\
         UNIFIED DIFF:\n```diff\n{unified_diff}\n```\n"
    )
}
