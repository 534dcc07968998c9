//! Error types for the command-execution engine
//!
//! Per-block failures (a script exiting non-zero, a timeout, an unsupported
//! language) are not errors: they travel back inside a `CodeExecutionResult`.
//! The variants below cover the conditions that abort the calling code path,
//! mostly setup-time problems with the working directory or the container
//! runtime.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("Docker image '{image}' is not available and could not be pulled: {reason}")]
    ImageUnavailable { image: String, reason: String },
    #[error("Container operation failed: {0}")]
    ContainerFailed(String),
    #[error("Container is not running; restart the executor")]
    ContainerNotRunning,
    #[error("I/O error during code execution: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Filename '{0}' is not inside the working directory")]
    FilenameOutsideWorkDir(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ExecutorError {
    /// Whether the error belongs to a single code block rather than the
    /// executor as a whole.
    pub fn is_block_local(&self) -> bool {
        matches!(
            self,
            ExecutorError::FilenameOutsideWorkDir(_) | ExecutorError::UnsupportedLanguage(_)
        )
    }
}
