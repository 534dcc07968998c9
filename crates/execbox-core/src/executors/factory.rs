//! Builds a [`CodeExecutor`] from configuration.

use std::sync::Arc;

use super::command_line::{DockerCommandLineCodeExecutor, LocalCommandLineCodeExecutor};
use super::CodeExecutor;
use crate::config::{CodeExecutionBackend, CodeExecutionConfig};
use crate::errors::ExecutorError;

pub struct CodeExecutorFactory;

impl CodeExecutorFactory {
    /// Validates `config` and constructs the executor for its backend.
    ///
    /// For Docker this connects to the daemon and resolves the image, but the
    /// container itself is not started until the first batch.
    pub async fn create(
        config: &CodeExecutionConfig,
    ) -> Result<Arc<dyn CodeExecutor>, ExecutorError> {
        config.validate()?;

        match config.backend {
            CodeExecutionBackend::Local => {
                log::info!(
                    "Using local code executor in {}",
                    config.work_dir.display()
                );
                let executor = LocalCommandLineCodeExecutor::local(config)?;
                Ok(Arc::new(executor))
            }
            CodeExecutionBackend::Docker => {
                log::info!(
                    "Using Docker code executor with image {} in {}",
                    config.image,
                    config.work_dir.display()
                );
                let executor = DockerCommandLineCodeExecutor::docker(config)
                    .await
                    .map_err(|e| {
                        log::error!("Failed to create Docker code executor: {}", e);
                        e
                    })?;
                Ok(Arc::new(executor))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodeExecutionConfigBuilder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_local_executor() {
        let dir = tempdir().unwrap();
        let config = CodeExecutionConfigBuilder::new()
            .local()
            .work_dir(dir.path().join("blocks"))
            .build()
            .unwrap();

        let executor = CodeExecutorFactory::create(&config).await.unwrap();
        let result = executor.execute_code_blocks(&[]).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(dir.path().join("blocks").is_dir());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_config() {
        let config = CodeExecutionConfigBuilder::new().timeout(0).build_unchecked();
        let result = CodeExecutorFactory::create(&config).await;
        assert!(matches!(result, Err(ExecutorError::ConfigError(_))));
    }
}
