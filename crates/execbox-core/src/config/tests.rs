//! Round trips between YAML, the builder and the executor options

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::executors::{ExecutorOptions, Language};
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test]
    #[serial]
    async fn test_load_config_feeds_executor_options() {
        let yaml_content = r#"
timeout: 12
sanitize_shell: false
execution_policies:
  sh: false
  python: true
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).await.unwrap();
        let options = ExecutorOptions::from_config(&config).unwrap();

        assert_eq!(options.timeout, Duration::from_secs(12));
        assert!(!options.sanitize_shell);
        assert!(!options.is_executable(Language::Shell));
        assert!(options.is_executable(Language::Python));
        assert!(options.is_executable(Language::JavaScript));
    }

    #[test]
    #[serial]
    fn test_yaml_and_builder_agree() {
        let from_yaml = ConfigLoader::from_str(
            "backend: docker\nimage: python:3.12-slim\ntimeout: 20\nauto_remove: false",
            None,
        )
        .unwrap();
        let from_builder = config()
            .docker("python:3.12-slim")
            .timeout(20)
            .auto_remove(false)
            .build()
            .unwrap();

        assert_eq!(from_yaml.backend, from_builder.backend);
        assert_eq!(from_yaml.image, from_builder.image);
        assert_eq!(from_yaml.timeout, from_builder.timeout);
        assert_eq!(from_yaml.auto_remove, from_builder.auto_remove);
        assert_eq!(from_yaml.work_dir, from_builder.work_dir);
    }

    #[test]
    fn test_config_serializes_lowercase_backend() {
        let config = config().docker("alpine:3").build_unchecked();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("backend: docker"));
    }
}
