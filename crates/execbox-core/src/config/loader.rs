//! Configuration loader for YAML files and environment resolution
//!
//! `work_dir`, `image` and `container_name` may reference environment
//! variables as `$VAR` or `${VAR}`. `EXECBOX_TIMEOUT`, `EXECBOX_IMAGE` and
//! `EXECBOX_WORK_DIR` override whatever the file says.

use regex::{Captures, Regex};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;

use crate::config::types::*;
use crate::errors::ExecutorError;

pub const TIMEOUT_ENV: &str = "EXECBOX_TIMEOUT";
pub const IMAGE_ENV: &str = "EXECBOX_IMAGE";
pub const WORK_DIR_ENV: &str = "EXECBOX_WORK_DIR";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    ///
    /// A relative `work_dir` is resolved against the file's directory.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CodeExecutionConfig, ExecutorError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            ExecutorError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content, path.parent())
    }

    /// Load configuration from a YAML string
    pub fn from_str(
        content: &str,
        base_dir: Option<&Path>,
    ) -> Result<CodeExecutionConfig, ExecutorError> {
        let mut config: CodeExecutionConfig = if content.trim().is_empty() {
            CodeExecutionConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                ExecutorError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::resolve_environment(&mut config)?;

        if let Some(base_dir) = base_dir {
            if config.work_dir.is_relative() && !base_dir.as_os_str().is_empty() {
                config.work_dir = base_dir.join(&config.work_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve environment variables in the configuration
    fn resolve_environment(config: &mut CodeExecutionConfig) -> Result<(), ExecutorError> {
        let work_dir = config.work_dir.to_string_lossy().into_owned();
        config.work_dir = PathBuf::from(Self::expand_env(&work_dir)?);
        config.image = Self::expand_env(&config.image)?;
        if let Some(name) = &config.container_name {
            config.container_name = Some(Self::expand_env(name)?);
        }

        if let Ok(timeout) = env::var(TIMEOUT_ENV) {
            config.timeout = timeout.trim().parse().map_err(|_| {
                ExecutorError::ConfigError(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    TIMEOUT_ENV, timeout
                ))
            })?;
        }
        if let Ok(image) = env::var(IMAGE_ENV) {
            config.image = image;
        }
        if let Ok(work_dir) = env::var(WORK_DIR_ENV) {
            config.work_dir = PathBuf::from(work_dir);
        }

        Ok(())
    }

    /// Expands `$VAR` and `${VAR}` references; unset variables are an error.
    fn expand_env(value: &str) -> Result<String, ExecutorError> {
        static ENV_REF: OnceLock<Regex> = OnceLock::new();
        let regex = ENV_REF.get_or_init(|| {
            Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
                .expect("env reference regex is valid")
        });

        let mut missing = None;
        let expanded = regex.replace_all(value, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match env::var(name) {
                Ok(resolved) => resolved,
                Err(_) => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(ExecutorError::ConfigError(format!(
                "Environment variable '{}' referenced in config is not set",
                name
            ))),
            None => Ok(expanded.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_load_basic_config() {
        let yaml_content = r#"
backend: docker
work_dir: /tmp/execbox
timeout: 30
image: "python:3.12-slim"
auto_remove: false
execution_policies:
  javascript: false
"#;

        let config = ConfigLoader::from_str(yaml_content, None).unwrap();
        assert_eq!(config.backend, CodeExecutionBackend::Docker);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/execbox"));
        assert_eq!(config.timeout, 30);
        assert_eq!(config.image, "python:3.12-slim");
        assert!(!config.auto_remove);
        assert!(config.stop_container);
        assert_eq!(config.execution_policies.get("javascript"), Some(&false));
    }

    #[test]
    #[serial]
    fn test_empty_config_uses_defaults() {
        let config = ConfigLoader::from_str("", None).unwrap();
        assert_eq!(config.backend, CodeExecutionBackend::Local);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.image, "python:3-slim");
        assert_eq!(config.work_dir, PathBuf::from("coding"));
        assert!(config.sanitize_shell);
        assert!(config.silence_pip);
    }

    #[test]
    #[serial]
    fn test_env_resolution() {
        env::set_var("EXECBOX_TEST_ROOT", "/srv/agents");

        let yaml_content = r#"
work_dir: "${EXECBOX_TEST_ROOT}/coding"
container_name: "$EXECBOX_TEST_ROOT"
"#;

        let config = ConfigLoader::from_str(yaml_content, None).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/srv/agents/coding"));
        assert_eq!(config.container_name.as_deref(), Some("/srv/agents"));

        env::remove_var("EXECBOX_TEST_ROOT");
    }

    #[test]
    #[serial]
    fn test_missing_env_var_is_error() {
        env::remove_var("EXECBOX_TEST_UNSET");
        let result = ConfigLoader::from_str("image: \"$EXECBOX_TEST_UNSET\"", None);
        assert!(matches!(result, Err(ExecutorError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var(TIMEOUT_ENV, "5");
        env::set_var(IMAGE_ENV, "alpine:3");

        let config = ConfigLoader::from_str("timeout: 90\nimage: busybox", None).unwrap();
        assert_eq!(config.timeout, 5);
        assert_eq!(config.image, "alpine:3");

        env::set_var(TIMEOUT_ENV, "soon");
        assert!(ConfigLoader::from_str("", None).is_err());

        env::remove_var(TIMEOUT_ENV);
        env::remove_var(IMAGE_ENV);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        assert!(ConfigLoader::from_str("timeout: 0", None).is_err());
        assert!(ConfigLoader::from_str("backend: docker\nimage: \"\"", None).is_err());
        assert!(ConfigLoader::from_str("backend: kubernetes", None).is_err());
        assert!(ConfigLoader::from_str("execution_policies:\n  cobol: true", None).is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_load_from_file() {
        let yaml_content = r#"
work_dir: scratch
timeout: 15
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.timeout, 15);
        assert_eq!(
            config.work_dir,
            temp_file.path().parent().unwrap().join("scratch")
        );
    }
}
