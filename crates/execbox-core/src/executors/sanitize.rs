//! Deny-list screen for shell blocks run directly on the host.
//!
//! This is a tripwire for the most destructive one-liners, not a sandbox.

use regex::Regex;
use std::sync::OnceLock;

struct DangerousPattern {
    regex: Regex,
    reason: &'static str,
}

fn patterns() -> &'static [DangerousPattern] {
    static PATTERNS: OnceLock<Vec<DangerousPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"\brm\s+-(?:[a-zA-Z]*r[a-zA-Z]*f|[a-zA-Z]*f[a-zA-Z]*r)[a-zA-Z]*\s+(?:--no-preserve-root\s+)?/(?:\s|$|\*)", "recursive deletion of the root directory"),
            (r"\brm\s+-(?:[a-zA-Z]*r[a-zA-Z]*f|[a-zA-Z]*f[a-zA-Z]*r)[a-zA-Z]*\s+~/?(?:\s|$)", "recursive deletion of the home directory"),
            (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
            (r"\bmkfs(?:\.[a-z0-9]+)?\b", "filesystem formatting"),
            (r"\bdd\s+if=\S+\s+of=/dev/", "raw write to a block device"),
            (r">\s*/dev/sd[a-z]", "overwrite of a block device"),
            (r"\bchmod\s+-R\s+777\s+/(?:\s|$)", "world-writable root filesystem"),
        ]
        .into_iter()
        .map(|(pattern, reason)| DangerousPattern {
            regex: Regex::new(pattern).expect("dangerous-command regex is valid"),
            reason,
        })
        .collect()
    })
}

/// Returns the reason the code was rejected, if it matches the deny-list.
pub fn check_shell(code: &str) -> Option<&'static str> {
    patterns()
        .iter()
        .find(|pattern| pattern.regex.is_match(code))
        .map(|pattern| pattern.reason)
}
