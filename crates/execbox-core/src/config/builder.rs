//! Fluent builder for code execution configurations

use std::path::PathBuf;

use crate::config::types::*;
use crate::errors::ExecutorError;

/// Builder for creating code execution configurations
#[derive(Debug, Clone, Default)]
pub struct CodeExecutionConfigBuilder {
    config: CodeExecutionConfig,
}

impl CodeExecutionConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Run blocks on the host
    pub fn local(mut self) -> Self {
        self.config.backend = CodeExecutionBackend::Local;
        self
    }

    /// Run blocks in a container built from `image`
    pub fn docker(mut self, image: impl Into<String>) -> Self {
        self.config.backend = CodeExecutionBackend::Docker;
        self.config.image = image.into();
        self
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = work_dir.into();
        self
    }

    /// Set the per-block timeout in seconds
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.config.timeout = seconds;
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.config.container_name = Some(name.into());
        self
    }

    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.config.auto_remove = auto_remove;
        self
    }

    pub fn stop_container(mut self, stop_container: bool) -> Self {
        self.config.stop_container = stop_container;
        self
    }

    /// Choose whether blocks in `language` are executed or only saved
    pub fn execution_policy(mut self, language: impl Into<String>, execute: bool) -> Self {
        self.config
            .execution_policies
            .insert(language.into().to_lowercase(), execute);
        self
    }

    pub fn sanitize_shell(mut self, enabled: bool) -> Self {
        self.config.sanitize_shell = enabled;
        self
    }

    pub fn silence_pip(mut self, enabled: bool) -> Self {
        self.config.silence_pip = enabled;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CodeExecutionConfig, ExecutorError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation
    pub fn build_unchecked(self) -> CodeExecutionConfig {
        self.config
    }
}
