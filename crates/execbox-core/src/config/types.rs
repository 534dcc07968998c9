//! Configuration types for code executors
//!
//! Every option has a default, so an empty YAML document is a valid
//! configuration: a local executor writing to `./coding` with a 60 second
//! timeout.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ExecutorError;
use crate::executors::docker::DEFAULT_IMAGE;
use crate::executors::language::{self, Language};

/// Code execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionConfig {
    #[serde(default)]
    pub backend: CodeExecutionBackend,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Per-block timeout in seconds
    #[serde(default = "default_code_timeout")]
    pub timeout: u64,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_true")]
    pub auto_remove: bool,
    #[serde(default = "default_true")]
    pub stop_container: bool,
    #[serde(default)]
    pub container_name: Option<String>,
    /// Language tag -> whether blocks in that language are run or only saved
    #[serde(default)]
    pub execution_policies: HashMap<String, bool>,
    #[serde(default = "default_true")]
    pub sanitize_shell: bool,
    #[serde(default = "default_true")]
    pub silence_pip: bool,
}

/// Code execution backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeExecutionBackend {
    #[default]
    Local,
    Docker,
}

impl Default for CodeExecutionConfig {
    fn default() -> Self {
        Self {
            backend: CodeExecutionBackend::default(),
            work_dir: default_work_dir(),
            timeout: default_code_timeout(),
            image: default_image(),
            auto_remove: true,
            stop_container: true,
            container_name: None,
            execution_policies: HashMap::new(),
            sanitize_shell: true,
            silence_pip: true,
        }
    }
}

impl CodeExecutionConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.timeout == 0 {
            return Err(ExecutorError::ConfigError(
                "Code execution timeout must be greater than 0".to_string(),
            ));
        }

        if self.work_dir.as_os_str().is_empty() {
            return Err(ExecutorError::ConfigError(
                "Code execution work_dir cannot be empty".to_string(),
            ));
        }

        if self.backend == CodeExecutionBackend::Docker && self.image.trim().is_empty() {
            return Err(ExecutorError::ConfigError(
                "Docker image cannot be empty".to_string(),
            ));
        }

        if let Some(name) = &self.container_name {
            if name.trim().is_empty() {
                return Err(ExecutorError::ConfigError(
                    "Container name cannot be empty when set".to_string(),
                ));
            }
        }

        self.resolved_policies()?;

        Ok(())
    }

    /// Execution policies keyed by resolved language.
    ///
    /// Aliases of one language (`py`, `python`) may both appear only if they
    /// agree.
    pub fn resolved_policies(&self) -> Result<HashMap<Language, bool>, ExecutorError> {
        let mut resolved: HashMap<Language, (&str, bool)> = HashMap::new();
        for (tag, allowed) in &self.execution_policies {
            let language = language::resolve(tag).map_err(|_| {
                ExecutorError::ConfigError(format!(
                    "Execution policy names unsupported language '{}'",
                    tag
                ))
            })?;
            match resolved.get(&language) {
                Some((other, previous)) if previous != allowed => {
                    return Err(ExecutorError::ConfigError(format!(
                        "Execution policies '{}' and '{}' disagree for {}",
                        other, tag, language
                    )));
                }
                Some(_) => {}
                None => {
                    resolved.insert(language, (tag.as_str(), *allowed));
                }
            }
        }
        Ok(resolved
            .into_iter()
            .map(|(language, (_, allowed))| (language, allowed))
            .collect())
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("coding")
}

fn default_code_timeout() -> u64 {
    60
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_true() -> bool {
    true
}
