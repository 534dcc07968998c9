//! Execution engine for code blocks produced by language-model agents.
//!
//! A batch of [`CodeBlock`]s is resolved to interpreters, written to files in
//! a working directory and run one after another, either as subprocesses on
//! the host or inside a single long-lived Docker container. The batch stops
//! at the first failing block and reports one combined
//! [`CodeExecutionResult`].
//!
//! # Architecture Overview
//!
//! - **Language resolution**: tag normalisation and interpreter lookup ([`executors::language`])
//! - **Code block store**: filename directives and content-addressed files ([`executors::store`])
//! - **Backends**: host subprocesses ([`executors::local`]) and Docker exec ([`executors::docker`])
//! - **Batch execution**: fail-fast sequencing and container lifecycle ([`executors::command_line`])
//! - **Configuration**: YAML files with environment resolution, or a builder ([`config`])

pub mod config;
pub mod core_types;
pub mod errors;
pub mod executors;
pub mod extraction;

pub use config::*;
pub use core_types::{CodeBlock, CodeExecutionResult, ExecutionCommand};
pub use errors::ExecutorError;
pub use executors::{
    CodeExecutor, CodeExecutorFactory, DockerCommandLineCodeExecutor, ExecutionBackend,
    LocalCommandLineCodeExecutor,
};
pub use extraction::extract_code_blocks;
