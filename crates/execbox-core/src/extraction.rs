//! Pulls fenced code blocks out of markdown text.

use regex::Regex;
use std::sync::OnceLock;

use crate::core_types::CodeBlock;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?ms)^[ \t]*```[ \t]*([\w+#.-]*)[^\n]*\n(.*?)^[ \t]*```[ \t]*$")
            .expect("code fence regex is valid")
    })
}

/// Returns the fenced code blocks in `text`, in order of appearance.
///
/// A fence without an info string is treated as `python`. Blocks whose body
/// is only whitespace are skipped.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    fence_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let language = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let code = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if code.trim().is_empty() {
                return None;
            }
            let language = if language.is_empty() { "python" } else { language };
            Some(CodeBlock::new(language, code.trim_end_matches('\n')))
        })
        .collect()
}
