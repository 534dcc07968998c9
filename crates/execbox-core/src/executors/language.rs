//! Language tag resolution.
//!
//! Maps the tag an agent puts on a code block to the interpreter that runs it
//! and the extension its file gets. The table is static; the tag is never
//! interpreted by a shell.

use crate::errors::ExecutorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Shell,
    JavaScript,
    PowerShell,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Shell,
        Language::JavaScript,
        Language::PowerShell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "sh",
            Language::JavaScript => "javascript",
            Language::PowerShell => "powershell",
        }
    }

    pub fn executable(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Shell => "sh",
            Language::JavaScript => "node",
            Language::PowerShell => "pwsh",
        }
    }

    /// Other names the interpreter is installed under on some hosts.
    pub fn alternative_executables(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python"],
            Language::PowerShell => &["powershell"],
            Language::Shell | Language::JavaScript => &[],
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Shell => "sh",
            Language::JavaScript => "js",
            Language::PowerShell => "ps1",
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, Language::Shell)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves a code block's language tag, case-insensitively.
pub fn resolve(tag: &str) -> Result<Language, ExecutorError> {
    match tag.trim().to_lowercase().as_str() {
        "python" | "python3" | "py" => Ok(Language::Python),
        "sh" | "bash" | "shell" => Ok(Language::Shell),
        "javascript" | "js" | "node" | "nodejs" => Ok(Language::JavaScript),
        "powershell" | "pwsh" | "ps1" => Ok(Language::PowerShell),
        _ => Err(ExecutorError::UnsupportedLanguage(tag.to_string())),
    }
}

pub fn supported_languages() -> Vec<&'static str> {
    Language::ALL.iter().map(Language::name).collect()
}
