//! Core type definitions for the code-execution contract
//!
//! These types are what an orchestrator hands in (`CodeBlock`) and reads back
//! (`CodeExecutionResult`). `ExecutionCommand` sits between the two: it is the
//! resolved program invocation, shared verbatim by the local and container
//! backends.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Exit code reported when a block overran its timeout.
///
/// Matches the status coreutils `timeout` returns, which is what the
/// container backend observes from its in-container wrapper.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the engine itself could not run a block
/// (spawn failure, exec transport failure).
pub const INFRASTRUCTURE_EXIT_CODE: i32 = -1;

pub const TIMEOUT_MSG: &str = "Timeout";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CodeExecutionResult {
    pub exit_code: i32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_file: Option<PathBuf>,
}

impl CodeExecutionResult {
    /// The result of running nothing at all.
    pub fn empty() -> Self {
        Self {
            exit_code: 0,
            output: String::new(),
            code_file: None,
        }
    }

    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            code_file: None,
        }
    }

    pub(crate) fn timed_out(partial_output: String, timeout_secs: u64) -> Self {
        let mut output = partial_output;
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!(
            "{}: code execution exceeded {}s and was terminated\n",
            TIMEOUT_MSG, timeout_secs
        ));
        Self::new(TIMEOUT_EXIT_CODE, output)
    }

    pub(crate) fn infrastructure_failure(message: impl Into<String>) -> Self {
        Self::new(INFRASTRUCTURE_EXIT_CODE, message)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// A resolved program invocation: `executable args...`.
///
/// File arguments are relative to the executor's working directory, with `/`
/// separators, so the same command runs on the host (cwd = work dir) and in
/// the container (working dir = bind-mount target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCommand {
    pub executable: String,
    pub args: Vec<String>,
}

impl ExecutionCommand {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    /// Builds `executable <relative_file>` for a code file stored under the
    /// working directory.
    pub fn for_code_file(executable: &str, relative_file: &Path) -> Self {
        let file_arg = relative_file
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        Self::new(executable, vec![file_arg])
    }

    /// `executable` followed by `args`, the argv handed to exec-style APIs.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.executable.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl std::fmt::Display for ExecutionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result() {
        let result = CodeExecutionResult::empty();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.is_empty());
        assert!(result.code_file.is_none());
        assert!(result.success());
    }

    #[test]
    fn test_timed_out_result_appends_notice() {
        let result = CodeExecutionResult::timed_out("partial".to_string(), 5);
        assert!(result.is_timeout());
        assert_eq!(
            result.output,
            "partial\nTimeout: code execution exceeded 5s and was terminated\n"
        );
    }

    #[test]
    fn test_command_for_nested_code_file() {
        let command = ExecutionCommand::for_code_file("python3", Path::new("pkg/./main.py"));
        assert_eq!(command.executable, "python3");
        assert_eq!(command.args, vec!["pkg/main.py".to_string()]);
        assert_eq!(command.to_string(), "python3 pkg/main.py");
    }

    #[test]
    fn test_result_serialization_skips_missing_code_file() {
        let json = serde_json::to_value(CodeExecutionResult::new(1, "boom")).unwrap();
        assert_eq!(json, serde_json::json!({"exit_code": 1, "output": "boom"}));
    }
}
