//! Code block persistence.
//!
//! Every block is written to a file under the executor's working directory
//! before it runs. The name comes from a `filename:` directive on the first
//! line when there is one, otherwise from the SHA-256 of the code, so the same
//! code always lands in the same file.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;

use super::language::Language;
use crate::errors::ExecutorError;

const CONTENT_ADDRESSED_PREFIX: &str = "tmp_code_";

fn directive_regex() -> &'static Regex {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    DIRECTIVE.get_or_init(|| {
        Regex::new(r"^(?:#|//|--|<!--)\s*filename:\s*(.*?)\s*(?:-->)?$")
            .expect("filename directive regex is valid")
    })
}

/// Returns the file name named by a first-line `filename:` directive.
///
/// Recognised markers are `#`, `//`, `--` and `<!-- ... -->`. A directive
/// with an empty name is treated as absent.
pub fn filename_from_directive(code: &str) -> Option<String> {
    let first_line = code.lines().next()?.trim();
    let captures = directive_regex().captures(first_line)?;
    let name = captures.get(1)?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn content_addressed_filename(code: &str, language: Language) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    let hash = hasher.finalize();
    format!("{}{:x}.{}", CONTENT_ADDRESSED_PREFIX, hash, language.extension())
}

/// Relative path (under the working directory) a block will be stored at.
pub fn relative_code_path(code: &str, language: Language) -> Result<PathBuf, ExecutorError> {
    let Some(name) = filename_from_directive(code) else {
        return Ok(PathBuf::from(content_addressed_filename(code, language)));
    };

    let mut relative = PathBuf::new();
    for component in Path::new(&name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExecutorError::FilenameOutsideWorkDir(name));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(ExecutorError::FilenameOutsideWorkDir(name));
    }
    Ok(relative)
}

/// Writes `code` under `work_dir` and returns the path of the file.
///
/// Any existing file at that path is overwritten.
pub async fn persist(
    code: &str,
    language: Language,
    work_dir: &Path,
) -> Result<PathBuf, ExecutorError> {
    let path = work_dir.join(relative_code_path(code, language)?);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&path, code.as_bytes()).await?;
    log::debug!("Stored {} code block at {}", language, path.display());
    Ok(path)
}

/// Adds `-qqq` to `pip install` lines so package installs do not flood the
/// captured output.
pub fn silence_pip(code: &str, language: Language) -> Cow<'_, str> {
    static PYTHON_PIP: OnceLock<Regex> = OnceLock::new();
    static SHELL_PIP: OnceLock<Regex> = OnceLock::new();

    let regex = match language {
        Language::Python => PYTHON_PIP
            .get_or_init(|| Regex::new(r"^(?:! ?)?pip install").expect("pip regex is valid")),
        Language::Shell | Language::PowerShell => SHELL_PIP
            .get_or_init(|| Regex::new(r"^pip install").expect("pip regex is valid")),
        Language::JavaScript => return Cow::Borrowed(code),
    };

    if !code.lines().any(|line| regex.is_match(line) && !line.contains("-qqq")) {
        return Cow::Borrowed(code);
    }

    let silenced = code
        .split('\n')
        .map(|line| {
            if line.contains("-qqq") {
                return Cow::Borrowed(line);
            }
            match regex.find(line) {
                Some(m) => Cow::Owned(format!("{} -qqq{}", m.as_str(), &line[m.end()..])),
                None => Cow::Borrowed(line),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    Cow::Owned(silenced)
}
