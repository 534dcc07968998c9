// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    StopContainerOptions as BollardStopContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::local::prepare_work_dir;
use super::ExecutionBackend;
use crate::core_types::{CodeExecutionResult, ExecutionCommand, TIMEOUT_EXIT_CODE};
use crate::errors::ExecutorError;

/// Mount point of the host working directory inside the container.
pub const CONTAINER_WORK_DIR: &str = "/workspace";

pub const DEFAULT_IMAGE: &str = "python:3-slim";

/// Seconds `timeout` waits after SIGTERM before sending SIGKILL.
const KILL_AFTER_SECS: u64 = 2;
/// Extra time the host allows past the in-container deadline before it
/// kills the exec itself.
const HOST_DEADLINE_GRACE: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(60);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Starting,
    Running,
    Stopped,
}

#[derive(Debug)]
struct ContainerHandle {
    state: ContainerState,
    id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DockerOptions {
    pub image: String,
    /// Defaults to `execbox-<uuid>`.
    pub container_name: Option<String>,
    pub auto_remove: bool,
    /// Whether dropping the backend stops a still-running container.
    pub stop_container: bool,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            container_name: None,
            auto_remove: true,
            stop_container: true,
        }
    }
}

/// Runs commands inside one long-lived container.
///
/// The container is created on `start()` or on the first `run`, and every
/// later command is an exec into it, so installed packages and files outside
/// the bind mount survive between blocks and between batches until `stop()`.
pub struct DockerBackend {
    docker: Docker,
    work_dir: PathBuf,
    bind_source: String,
    image: String,
    container_name: String,
    auto_remove: bool,
    stop_container: bool,
    handle: Mutex<ContainerHandle>,
}

impl DockerBackend {
    /// Connects to the local Docker daemon and makes sure the image is
    /// present, pulling it if needed. The container itself is created lazily.
    pub async fn new(work_dir: impl AsRef<Path>, options: DockerOptions) -> Result<Self, ExecutorError> {
        let work_dir = prepare_work_dir(work_dir.as_ref())?;
        let bind_source = work_dir
            .to_str()
            .ok_or_else(|| {
                ExecutorError::ConfigError(format!(
                    "Working directory {} is not valid UTF-8",
                    work_dir.display()
                ))
            })?
            .to_string();

        let docker = Docker::connect_with_local_defaults()?;
        let container_name = options
            .container_name
            .unwrap_or_else(|| format!("execbox-{}", Uuid::new_v4()));

        let backend = Self {
            docker,
            work_dir,
            bind_source,
            image: options.image,
            container_name,
            auto_remove: options.auto_remove,
            stop_container: options.stop_container,
            handle: Mutex::new(ContainerHandle {
                state: ContainerState::Absent,
                id: None,
            }),
        };
        backend.ensure_image().await?;
        Ok(backend)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub async fn container_id(&self) -> Option<String> {
        self.handle.lock().await.id.clone()
    }

    pub async fn state(&self) -> ContainerState {
        self.handle.lock().await.state
    }

    async fn ensure_image(&self) -> Result<(), ExecutorError> {
        match self.docker.inspect_image(&self.image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(e) => return Err(e.into()),
        }

        log::info!("Image {} not found locally, pulling", self.image);
        let (from_image, tag) = split_image_reference(&self.image);
        let pull_options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(from_image),
            tag,
            ..Default::default()
        });

        let mut pull_stream = self.docker.create_image(pull_options, None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        log::debug!("Pulling {}: {}", self.image, status);
                    }
                }
                Err(e) => {
                    return Err(ExecutorError::ImageUnavailable {
                        image: self.image.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        self.docker
            .inspect_image(&self.image)
            .await
            .map_err(|e| ExecutorError::ImageUnavailable {
                image: self.image.clone(),
                reason: e.to_string(),
            })?;
        log::info!("Pulled image {}", self.image);
        Ok(())
    }

    async fn create_container(&self) -> Result<String, ExecutorError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(self.container_name.clone()),
            ..Default::default()
        });

        // A shell on a TTY with nothing to read keeps the container alive
        // between execs.
        let config = ContainerCreateBody {
            image: Some(self.image.clone()),
            entrypoint: Some(vec!["/bin/sh".to_string()]),
            tty: Some(true),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:rw",
                    self.bind_source, CONTAINER_WORK_DIR
                )]),
                auto_remove: Some(self.auto_remove),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self.docker.create_container(options, config).await?;
        log::info!(
            "Created container {} ({}) from image {}",
            self.container_name,
            container.id,
            self.image
        );
        Ok(container.id)
    }

    async fn start_and_wait(&self, container_id: &str) -> Result<(), ExecutorError> {
        self.docker
            .start_container(container_id, None::<BollardStartContainerOptionsQuery>)
            .await?;

        let deadline = Instant::now() + READY_TIMEOUT;
        loop {
            let info = self
                .docker
                .inspect_container(container_id, None::<BollardInspectContainerOptionsQuery>)
                .await?;
            if info.state.and_then(|s| s.running).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecutorError::ContainerFailed(format!(
                    "Container {} did not reach the running state within {}s",
                    container_id,
                    READY_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn ensure_running(&self) -> Result<String, ExecutorError> {
        {
            let handle = self.handle.lock().await;
            match (handle.state, &handle.id) {
                (ContainerState::Running, Some(id)) => return Ok(id.clone()),
                (ContainerState::Absent, _) => {}
                _ => return Err(ExecutorError::ContainerNotRunning),
            }
        }
        self.start().await?;
        self.handle
            .lock()
            .await
            .id
            .clone()
            .ok_or(ExecutorError::ContainerNotRunning)
    }

    async fn mark_not_running(&self) {
        let mut handle = self.handle.lock().await;
        if handle.state == ContainerState::Running {
            handle.state = ContainerState::Stopped;
        }
    }

    /// Kills every process in the container except its init shell.
    async fn kill_exec_processes(&self, container_id: &str) {
        let config = ExecConfig {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "kill -9 -1".to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = match self.docker.create_exec(container_id, config).await {
            Ok(exec) => exec,
            Err(e) => {
                log::warn!("Failed to create kill exec in {}: {}", container_id, e);
                return;
            }
        };
        match self.docker.start_exec(&exec.id, None::<StartExecOptions>).await {
            Ok(StartExecResults::Attached { mut output, .. }) => while output.next().await.is_some() {},
            Ok(StartExecResults::Detached) => {}
            Err(e) => log::warn!("Failed to kill processes in {}: {}", container_id, e),
        }
    }
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn start(&self) -> Result<(), ExecutorError> {
        let mut handle = self.handle.lock().await;
        if handle.state == ContainerState::Running {
            return Ok(());
        }
        self.ensure_image().await?;

        let previous = handle.state;
        handle.state = ContainerState::Starting;

        // A stopped container that was not auto-removed is started again.
        if let Some(id) = handle.id.clone() {
            match self.start_and_wait(&id).await {
                Ok(()) => {
                    log::info!("Restarted container {}", self.container_name);
                    handle.state = ContainerState::Running;
                    return Ok(());
                }
                Err(ExecutorError::BollardError(
                    bollard::errors::Error::DockerResponseServerError { status_code: 404, .. },
                )) => {
                    handle.id = None;
                }
                Err(e) => {
                    handle.state = previous;
                    return Err(e);
                }
            }
        }

        let id = match self.create_container().await {
            Ok(id) => id,
            Err(e) => {
                handle.state = previous;
                return Err(e);
            }
        };
        if let Err(e) = self.start_and_wait(&id).await {
            log::error!("Container {} failed to start: {}", self.container_name, e);
            if let Err(cleanup) = stop_and_remove(&self.docker, &id, true).await {
                log::warn!(
                    "Failed to remove container {} after failed start: {}",
                    self.container_name,
                    cleanup
                );
            }
            handle.state = previous;
            return Err(e);
        }

        handle.id = Some(id);
        handle.state = ContainerState::Running;
        Ok(())
    }

    async fn run(
        &self,
        command: &ExecutionCommand,
        timeout: Duration,
    ) -> Result<CodeExecutionResult, ExecutorError> {
        let container_id = self.ensure_running().await?;
        let timeout_secs = timeout.as_secs().max(1);

        let config = ExecConfig {
            cmd: Some(wrap_with_timeout(command, timeout_secs)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            ..Default::default()
        };

        let exec = match self.docker.create_exec(&container_id, config).await {
            Ok(exec) => exec,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                message,
            }) => {
                log::error!("Container {} is gone: {}", self.container_name, message);
                self.mark_not_running().await;
                return Err(ExecutorError::ContainerNotRunning);
            }
            Err(e) => {
                log::error!("Failed to create exec for '{}': {}", command, e);
                return Ok(CodeExecutionResult::infrastructure_failure(format!(
                    "Failed to start '{}' in container: {}\n",
                    command, e
                )));
            }
        };

        let started = Instant::now();
        let deadline = host_deadline(started, timeout_secs);
        let mut output = String::new();

        match self.docker.start_exec(&exec.id, None::<StartExecOptions>).await {
            Ok(StartExecResults::Attached { output: mut stream, .. }) => loop {
                let next = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, stream.next()).await,
                    None => Ok(stream.next().await),
                };
                match next {
                    Ok(Some(Ok(log_output))) => match log_output {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message } => {
                            output.push_str(&String::from_utf8_lossy(&message))
                        }
                        _ => {}
                    },
                    Ok(Some(Err(e))) => {
                        log::error!("Exec output stream for '{}' failed: {}", command, e);
                        output.push_str(&format!("\nExec stream error: {}\n", e));
                        return Ok(CodeExecutionResult::infrastructure_failure(output));
                    }
                    Ok(None) => break,
                    Err(_) => {
                        log::warn!(
                            "Exec of '{}' outlived its {}s timeout; killing it",
                            command,
                            timeout_secs
                        );
                        self.kill_exec_processes(&container_id).await;
                        return Ok(CodeExecutionResult::timed_out(output, timeout_secs));
                    }
                }
            },
            Ok(StartExecResults::Detached) => {
                return Ok(CodeExecutionResult::infrastructure_failure(
                    "Exec unexpectedly started detached\n",
                ));
            }
            Err(e) => {
                log::error!("Failed to start exec for '{}': {}", command, e);
                return Ok(CodeExecutionResult::infrastructure_failure(format!(
                    "Failed to start '{}' in container: {}\n",
                    command, e
                )));
            }
        }

        let exit_code = match self.docker.inspect_exec(&exec.id).await {
            Ok(info) => info.exit_code,
            Err(e) => {
                log::error!("Failed to inspect exec for '{}': {}", command, e);
                None
            }
        };
        let Some(exit_code) = exit_code else {
            output.push_str("\nCould not determine the exit code of the command\n");
            return Ok(CodeExecutionResult::infrastructure_failure(output));
        };
        let exit_code = exit_code as i32;

        if is_timeout_exit(exit_code, started.elapsed(), Duration::from_secs(timeout_secs)) {
            log::warn!("Execution of '{}' timed out after {}s", command, timeout_secs);
            return Ok(CodeExecutionResult::timed_out(output, timeout_secs));
        }
        Ok(CodeExecutionResult::new(exit_code, output))
    }

    /// Stops the container; with `auto_remove` it is also removed. Stopping
    /// an executor that is not running is a no-op.
    async fn stop(&self) -> Result<(), ExecutorError> {
        let mut handle = self.handle.lock().await;
        if handle.state != ContainerState::Running {
            return Ok(());
        }
        let Some(id) = handle.id.clone() else {
            handle.state = ContainerState::Stopped;
            return Ok(());
        };

        stop_and_remove(&self.docker, &id, self.auto_remove).await?;
        handle.state = ContainerState::Stopped;
        if self.auto_remove {
            handle.id = None;
        }
        Ok(())
    }

    /// Replaces the container with a fresh one, discarding everything outside
    /// the bind mount. A container kept by `auto_remove = false` is removed.
    async fn restart(&self) -> Result<(), ExecutorError> {
        {
            let mut handle = self.handle.lock().await;
            if let Some(id) = handle.id.take() {
                log::info!("Restarting container {}", self.container_name);
                stop_and_remove(&self.docker, &id, true).await?;
            }
            handle.state = ContainerState::Absent;
        }
        self.start().await
    }
}

impl Drop for DockerBackend {
    fn drop(&mut self) {
        let handle = self.handle.get_mut();
        if handle.state != ContainerState::Running {
            return;
        }
        let Some(id) = handle.id.clone() else {
            return;
        };
        if !self.stop_container {
            log::info!(
                "Leaving container {} running (stop_container = false)",
                self.container_name
            );
            return;
        }

        // Best effort: Drop cannot await, and the owning runtime may be
        // shutting down, so clean up on a private runtime and connection.
        log::info!("Stopping container {} on drop", self.container_name);
        let remove = self.auto_remove;
        let cleanup = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::warn!("Cannot build cleanup runtime: {}", e);
                    return;
                }
            };
            runtime.block_on(async move {
                let docker = match Docker::connect_with_local_defaults() {
                    Ok(docker) => docker,
                    Err(e) => {
                        log::warn!("Cannot connect to Docker for cleanup: {}", e);
                        return;
                    }
                };
                if let Err(e) = stop_and_remove(&docker, &id, remove).await {
                    log::warn!("Failed to stop container {} on drop: {}", id, e);
                }
            });
        });
        if cleanup.join().is_err() {
            log::warn!("Container cleanup thread panicked");
        }
        handle.state = ContainerState::Stopped;
    }
}

/// Stops a container and optionally removes it, tolerating containers that
/// are already stopped or already gone.
async fn stop_and_remove(docker: &Docker, container_id: &str, remove: bool) -> Result<(), ExecutorError> {
    match docker
        .stop_container(container_id, None::<BollardStopContainerOptionsQuery>)
        .await
    {
        Ok(()) => log::info!("Stopped container {}", container_id),
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 304 | 404, .. }) => {
            log::debug!("Container {} was already stopped", container_id);
        }
        Err(e) => return Err(e.into()),
    }

    if remove {
        // The daemon may already be removing an auto-remove container.
        match docker
            .remove_container(container_id, None::<BollardRemoveContainerOptionsQuery>)
            .await
        {
            Ok(()) => log::info!("Removed container {}", container_id),
            Err(e) => log::debug!("Container {} not removed explicitly: {}", container_id, e),
        }
    }
    Ok(())
}

/// Prefixes the command with coreutils `timeout` so the deadline is enforced
/// inside the container, where the process lives.
fn wrap_with_timeout(command: &ExecutionCommand, timeout_secs: u64) -> Vec<String> {
    let mut argv = vec![
        "timeout".to_string(),
        "-k".to_string(),
        KILL_AFTER_SECS.to_string(),
        timeout_secs.to_string(),
    ];
    argv.extend(command.argv());
    argv
}

/// When the host gives up on an exec; `None` if the timeout is too large to
/// represent, leaving the in-container wrapper as the only deadline.
fn host_deadline(started: Instant, timeout_secs: u64) -> Option<Instant> {
    Duration::from_secs(timeout_secs)
        .checked_add(HOST_DEADLINE_GRACE)
        .and_then(|budget| started.checked_add(budget))
}

/// 124 is `timeout`'s own status; 137 (SIGKILL) only counts once the
/// deadline has actually passed.
fn is_timeout_exit(exit_code: i32, elapsed: Duration, timeout: Duration) -> bool {
    exit_code == TIMEOUT_EXIT_CODE || (exit_code == 137 && elapsed >= timeout)
}

/// Splits `name[:tag]` for the pull API, which pulls every tag when none is
/// given. Digest references are passed through untouched.
fn split_image_reference(image: &str) -> (String, Option<String>) {
    if image.contains('@') {
        return (image.to_string(), None);
    }
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(colon) => {
            let colon = last_slash + colon;
            (image[..colon].to_string(), Some(image[colon + 1..].to_string()))
        }
        None => (image.to_string(), Some("latest".to_string())),
    }
}
