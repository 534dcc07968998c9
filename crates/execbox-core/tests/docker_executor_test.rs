//! These tests need a running Docker daemon and network access to pull
//! `python:3-slim`. Run with `cargo test -- --ignored`.

use bollard::query_parameters::{InspectContainerOptions, RemoveContainerOptions};
use bollard::Docker;
use execbox_core::config::CodeExecutionConfigBuilder;
use execbox_core::core_types::{CodeBlock, TIMEOUT_EXIT_CODE};
use execbox_core::executors::{CodeExecutor, ContainerState, DockerCommandLineCodeExecutor};
use execbox_core::ExecutorError;
use std::sync::Arc;
use tempfile::tempdir;
use uuid::Uuid;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn docker_executor(
    work_dir: &std::path::Path,
    name: Option<&str>,
    auto_remove: bool,
    timeout: u64,
) -> anyhow::Result<DockerCommandLineCodeExecutor> {
    let mut builder = CodeExecutionConfigBuilder::new()
        .docker("python:3-slim")
        .work_dir(work_dir)
        .timeout(timeout)
        .auto_remove(auto_remove);
    if let Some(name) = name {
        builder = builder.container_name(name);
    }
    Ok(DockerCommandLineCodeExecutor::docker(&builder.build()?).await?)
}

#[tokio::test]
#[ignore]
async fn test_docker_hello_world() -> anyhow::Result<()> {
    init_logging();
    let dir = tempdir()?;
    let executor = docker_executor(dir.path(), None, true, 30).await?;

    let result = executor
        .execute_code_blocks(&[CodeBlock::new("python", "print('Hello, World!')")])
        .await?;

    assert_eq!(result.exit_code, 0);
    assert!(result.output.contains("Hello, World!\n"));
    assert!(result.code_file.unwrap().starts_with(executor.work_dir()));
    assert_eq!(executor.backend().state().await, ContainerState::Running);

    executor.stop().await?;
    assert_eq!(executor.backend().state().await, ContainerState::Stopped);
    // Stopping twice is a no-op.
    executor.stop().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_docker_state_persists_across_batches() -> anyhow::Result<()> {
    init_logging();
    let dir = tempdir()?;
    let executor = docker_executor(dir.path(), None, true, 30).await?;

    let first = executor
        .execute_code("sh", "echo kept > /tmp/outside_mount.txt")
        .await?;
    assert_eq!(first.exit_code, 0);

    let second = executor.execute_code("sh", "cat /tmp/outside_mount.txt").await?;
    assert_eq!(second.exit_code, 0);
    assert_eq!(second.output, "kept\n");

    executor.restart().await?;
    let third = executor.execute_code("sh", "cat /tmp/outside_mount.txt").await?;
    assert_ne!(third.exit_code, 0);

    executor.stop().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_docker_timeout() -> anyhow::Result<()> {
    init_logging();
    let dir = tempdir()?;
    let executor = docker_executor(dir.path(), None, true, 2).await?;

    let result = executor
        .execute_code("python", "import time\nprint('start', flush=True)\ntime.sleep(30)")
        .await?;

    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.output.contains("Timeout"));

    // The container is still usable afterwards.
    let after = executor.execute_code("sh", "echo alive").await?;
    assert_eq!(after.output, "alive\n");

    executor.stop().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_stopped_container_is_kept_without_auto_remove() -> anyhow::Result<()> {
    init_logging();
    let dir = tempdir()?;
    let name = format!("execbox-test-{}", Uuid::new_v4());
    let executor = docker_executor(dir.path(), Some(&name), false, 30).await?;

    executor.start().await?;
    executor.stop().await?;

    let docker = Docker::connect_with_local_defaults()?;
    let inspect = docker
        .inspect_container(&name, None::<InspectContainerOptions>)
        .await?;
    let running = inspect.state.and_then(|s| s.running).unwrap_or(false);
    assert!(!running);

    let result = executor.execute_code("sh", "echo hi").await;
    assert!(matches!(result, Err(ExecutorError::ContainerNotRunning)));

    docker
        .remove_container(
            &name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_scoped_stops_container() -> anyhow::Result<()> {
    init_logging();
    let dir = tempdir()?;
    let executor = Arc::new(docker_executor(dir.path(), None, true, 30).await?);

    let output = executor
        .clone()
        .scoped(|executor| async move {
            executor
                .execute_code("python", "print(6 * 7)")
                .await
                .map(|result| result.output)
        })
        .await??;

    assert_eq!(output, "42\n");
    assert_eq!(executor.backend().state().await, ContainerState::Stopped);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_missing_image_fails_at_construction() {
    init_logging();
    let dir = tempdir().unwrap();
    let config = CodeExecutionConfigBuilder::new()
        .docker("execbox/definitely-not-a-real-image:never")
        .work_dir(dir.path())
        .build()
        .unwrap();

    let result = DockerCommandLineCodeExecutor::docker(&config).await;
    assert!(matches!(result, Err(ExecutorError::ImageUnavailable { .. })));
}
