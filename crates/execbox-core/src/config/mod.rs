//! Configuration for code executors
//!
//! Configurations come from YAML files (with environment variable
//! resolution) or are assembled programmatically with
//! [`CodeExecutionConfigBuilder`].

pub mod builder;
pub mod loader;
pub mod types;

pub use builder::CodeExecutionConfigBuilder;
pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::ExecutorError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CodeExecutionConfig, ExecutorError> {
    ConfigLoader::from_file(path).await
}

/// Create a new configuration builder
pub fn config() -> CodeExecutionConfigBuilder {
    CodeExecutionConfigBuilder::new()
}
