//! Fail-fast batch execution over an [`ExecutionBackend`].

use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::docker::{DockerBackend, DockerOptions};
use super::language::{self, Language};
use super::local::LocalBackend;
use super::{sanitize, store, CodeExecutor, ExecutionBackend};
use crate::config::CodeExecutionConfig;
use crate::core_types::{CodeBlock, CodeExecutionResult, ExecutionCommand};
use crate::errors::ExecutorError;

/// Per-executor behaviour that is independent of the backend.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub timeout: Duration,
    /// Languages mapped to `false` are written to disk but not run.
    pub execution_policies: HashMap<Language, bool>,
    pub sanitize_shell: bool,
    pub silence_pip: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            execution_policies: HashMap::new(),
            sanitize_shell: true,
            silence_pip: true,
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &CodeExecutionConfig) -> Result<Self, ExecutorError> {
        let execution_policies = config.resolved_policies()?;

        Ok(Self {
            timeout: config.timeout_duration(),
            execution_policies,
            sanitize_shell: config.sanitize_shell,
            silence_pip: config.silence_pip,
        })
    }

    pub fn is_executable(&self, language: Language) -> bool {
        self.execution_policies.get(&language).copied().unwrap_or(true)
    }
}

/// Runs batches of code blocks against one backend.
///
/// Batches are serialized: a second `execute_code_blocks` call waits until
/// the first has finished, since every batch shares the backend's working
/// directory (and, for Docker, its container).
pub struct CommandLineCodeExecutor<B: ExecutionBackend> {
    backend: B,
    options: ExecutorOptions,
    batch_lock: Mutex<()>,
}

pub type LocalCommandLineCodeExecutor = CommandLineCodeExecutor<LocalBackend>;
pub type DockerCommandLineCodeExecutor = CommandLineCodeExecutor<DockerBackend>;

impl<B: ExecutionBackend> CommandLineCodeExecutor<B> {
    pub fn new(backend: B, options: ExecutorOptions) -> Self {
        Self {
            backend,
            options,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn work_dir(&self) -> &Path {
        self.backend.work_dir()
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    pub async fn start(&self) -> Result<(), ExecutorError> {
        self.backend.start().await
    }

    async fn run_batch(&self, code_blocks: &[CodeBlock]) -> Result<CodeExecutionResult, ExecutorError> {
        let _batch = self.batch_lock.lock().await;
        let mut result = CodeExecutionResult::empty();

        for (index, block) in code_blocks.iter().enumerate() {
            log::debug!(
                "Executing code block {}/{} ({})",
                index + 1,
                code_blocks.len(),
                block.language
            );

            let language = match language::resolve(&block.language) {
                Ok(language) => language,
                Err(e) => {
                    log::warn!("{}", e);
                    result.output.push_str(&format!("{}\n", e));
                    result.exit_code = 1;
                    break;
                }
            };

            let code = if self.options.silence_pip {
                store::silence_pip(&block.code, language)
            } else {
                block.code.as_str().into()
            };

            if self.options.sanitize_shell && language.is_shell() {
                if let Some(reason) = sanitize::check_shell(&code) {
                    log::warn!("Refusing to run shell block: {}", reason);
                    result
                        .output
                        .push_str(&format!("Potentially dangerous command detected: {}\n", reason));
                    result.exit_code = 1;
                    break;
                }
            }

            let code_file = match store::persist(&code, language, self.backend.work_dir()).await {
                Ok(path) => path,
                Err(e) if e.is_block_local() => {
                    log::warn!("{}", e);
                    result.output.push_str(&format!("{}\n", e));
                    result.exit_code = 1;
                    break;
                }
                Err(e) => return Err(e),
            };
            result.code_file = Some(code_file.clone());

            if !self.options.is_executable(language) {
                log::info!("Execution of {} code disabled by policy", language);
                result
                    .output
                    .push_str(&format!("Code saved to {}\n", code_file.display()));
                result.exit_code = 0;
                continue;
            }

            let relative = code_file
                .strip_prefix(self.backend.work_dir())
                .unwrap_or(code_file.as_path());
            let command = ExecutionCommand::for_code_file(language.executable(), relative);
            let block_result = self.backend.run(&command, self.options.timeout).await?;

            result.output.push_str(&block_result.output);
            result.exit_code = block_result.exit_code;
            if result.exit_code != 0 {
                log::debug!(
                    "Code block {} exited with {}; skipping the remaining {}",
                    index + 1,
                    result.exit_code,
                    code_blocks.len() - index - 1
                );
                break;
            }
        }

        Ok(result)
    }
}

impl LocalCommandLineCodeExecutor {
    pub fn local(config: &CodeExecutionConfig) -> Result<Self, ExecutorError> {
        let backend = LocalBackend::new(&config.work_dir)?;
        Ok(Self::new(backend, ExecutorOptions::from_config(config)?))
    }
}

impl DockerCommandLineCodeExecutor {
    /// Connects to Docker and resolves the image. Fails immediately if the
    /// image cannot be pulled.
    pub async fn docker(config: &CodeExecutionConfig) -> Result<Self, ExecutorError> {
        let backend = DockerBackend::new(
            &config.work_dir,
            DockerOptions {
                image: config.image.clone(),
                container_name: config.container_name.clone(),
                auto_remove: config.auto_remove,
                stop_container: config.stop_container,
            },
        )
        .await?;

        let mut options = ExecutorOptions::from_config(config)?;
        // Shell blocks run inside the container, not on the host.
        options.sanitize_shell = false;
        Ok(Self::new(backend, options))
    }

    /// Starts the container, runs `f`, and stops the container afterwards
    /// whether `f` returns or panics.
    pub async fn scoped<F, Fut, T>(self: Arc<Self>, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.backend.start().await?;
        let outcome = AssertUnwindSafe(f(self.clone())).catch_unwind().await;
        let stopped = self.backend.stop().await;

        match outcome {
            Ok(value) => {
                stopped?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = stopped {
                    log::error!("Failed to stop container after panic: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[async_trait]
impl<B: ExecutionBackend> CodeExecutor for CommandLineCodeExecutor<B> {
    async fn execute_code_blocks(
        &self,
        code_blocks: &[CodeBlock],
    ) -> Result<CodeExecutionResult, ExecutorError> {
        self.run_batch(code_blocks).await
    }

    async fn restart(&self) -> Result<(), ExecutorError> {
        let _batch = self.batch_lock.lock().await;
        self.backend.restart().await
    }

    async fn stop(&self) -> Result<(), ExecutorError> {
        self.backend.stop().await
    }
}
