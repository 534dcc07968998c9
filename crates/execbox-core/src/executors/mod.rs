//! Code execution environments for agent-generated code blocks.
//!
//! A code block is resolved to an interpreter, written to a file in the
//! executor's working directory and run by an [`ExecutionBackend`]: either a
//! subprocess on the host ([`local`]) or an exec inside one long-lived Docker
//! container ([`docker`]). [`command_line::CommandLineCodeExecutor`] drives a
//! backend over a batch of blocks with fail-fast semantics.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::core_types::{CodeBlock, CodeExecutionResult, ExecutionCommand};
use crate::errors::ExecutorError;

/// The capability an orchestrator consumes: run a batch, read one result.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code_blocks(
        &self,
        code_blocks: &[CodeBlock],
    ) -> Result<CodeExecutionResult, ExecutorError>;

    async fn execute_code(
        &self,
        language: &str,
        code: &str,
    ) -> Result<CodeExecutionResult, ExecutorError> {
        self.execute_code_blocks(&[CodeBlock::new(language, code)])
            .await
    }

    /// Discards backend state (for containers: a fresh container).
    async fn restart(&self) -> Result<(), ExecutorError>;

    async fn stop(&self) -> Result<(), ExecutorError>;
}

/// Where a resolved command actually runs.
///
/// `run` reports the command's own failures (non-zero exit, timeout) through
/// the returned result; `Err` is reserved for conditions that make the
/// backend unusable.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Host directory that code files are written to.
    fn work_dir(&self) -> &Path;

    async fn start(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn run(
        &self,
        command: &ExecutionCommand,
        timeout: Duration,
    ) -> Result<CodeExecutionResult, ExecutorError>;

    async fn stop(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), ExecutorError> {
        self.stop().await?;
        self.start().await
    }
}

pub mod command_line;
pub mod docker;
pub mod factory;
pub mod language;
pub mod local;
pub mod sanitize;
pub mod store;

pub use command_line::{
    CommandLineCodeExecutor, DockerCommandLineCodeExecutor, ExecutorOptions,
    LocalCommandLineCodeExecutor,
};
pub use docker::{ContainerState, DockerBackend};
pub use factory::CodeExecutorFactory;
pub use language::Language;
pub use local::LocalBackend;
