//! Host subprocess backend.
//!
//! Each command runs as a fresh child process with the working directory as
//! its cwd. There is no isolation beyond what the host OS gives any process:
//! do not point this backend at untrusted code.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::language::Language;
use super::ExecutionBackend;
use crate::core_types::{CodeExecutionResult, ExecutionCommand, INFRASTRUCTURE_EXIT_CODE};
use crate::errors::ExecutorError;

/// How long to wait for pipe readers once the process has been killed.
const READER_GRACE: Duration = Duration::from_secs(2);

pub struct LocalBackend {
    work_dir: PathBuf,
}

impl LocalBackend {
    /// Creates the backend, creating `work_dir` if it does not exist.
    pub fn new(work_dir: impl AsRef<Path>) -> Result<Self, ExecutorError> {
        Ok(Self {
            work_dir: prepare_work_dir(work_dir.as_ref())?,
        })
    }

    fn locate(&self, executable: &str) -> Option<PathBuf> {
        let alternatives = Language::ALL
            .iter()
            .filter(|language| language.executable() == executable)
            .flat_map(|language| language.alternative_executables().iter().copied());

        std::iter::once(executable)
            .chain(alternatives)
            .find_map(|candidate| which::which(candidate).ok())
    }
}

/// Creates the working directory if needed and returns its canonical path.
pub(crate) fn prepare_work_dir(work_dir: &Path) -> Result<PathBuf, ExecutorError> {
    std::fs::create_dir_all(work_dir).map_err(|e| {
        ExecutorError::ConfigError(format!(
            "Cannot create working directory {}: {}",
            work_dir.display(),
            e
        ))
    })?;
    work_dir.canonicalize().map_err(|e| {
        ExecutorError::ConfigError(format!(
            "Cannot resolve working directory {}: {}",
            work_dir.display(),
            e
        ))
    })
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn run(
        &self,
        command: &ExecutionCommand,
        timeout: Duration,
    ) -> Result<CodeExecutionResult, ExecutorError> {
        let Some(program) = self.locate(&command.executable) else {
            log::error!("Executable '{}' not found on PATH", command.executable);
            return Ok(CodeExecutionResult::infrastructure_failure(format!(
                "Executable '{}' not found on PATH\n",
                command.executable
            )));
        };

        let mut std_cmd = std::process::Command::new(&program);
        std_cmd
            .args(&command.args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout can take down anything the script forked.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to spawn '{}': {}", command, e);
                return Ok(CodeExecutionResult::infrastructure_failure(format!(
                    "Failed to start '{}': {}\n",
                    command, e
                )));
            }
        };
        // `Child::id` is gone once the child has been reaped.
        let pid = child.id();
        log::debug!("Spawned '{}' (pid {:?})", command, pid);

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let mut stdout_task = tokio::spawn(read_into(child.stdout.take(), stdout.clone()));
        let mut stderr_task = tokio::spawn(read_into(child.stderr.take(), stderr.clone()));

        let wait_outcome = tokio::time::timeout(timeout, child.wait()).await;

        let status = match wait_outcome {
            Ok(Ok(status)) => {
                // Background jobs the script left behind would keep the pipes open.
                kill_process_group(pid);
                Some(status)
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return Ok(CodeExecutionResult::infrastructure_failure(format!(
                    "Failed to wait for '{}': {}\n",
                    command, e
                )));
            }
            Err(_) => {
                log::warn!(
                    "Execution of '{}' timed out after {}s",
                    command,
                    timeout.as_secs()
                );
                terminate(&mut child, pid).await;
                None
            }
        };

        collect(&mut stdout_task).await;
        collect(&mut stderr_task).await;
        let mut output = String::from_utf8_lossy(&stdout.take()).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr.take()));

        Ok(match status {
            Some(status) => CodeExecutionResult::new(exit_code_of(status), output),
            None => CodeExecutionResult::timed_out(output, timeout.as_secs()),
        })
    }
}

/// Bytes read from one pipe so far; survives the reader being aborted.
#[derive(Clone, Default)]
struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    fn append(&self, bytes: &[u8]) {
        if let Ok(mut buffer) = self.0.lock() {
            buffer.extend_from_slice(bytes);
        }
    }

    fn take(&self) -> Vec<u8> {
        self.0
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default()
    }
}

async fn read_into<R: AsyncRead + Unpin>(reader: Option<R>, buffer: OutputBuffer) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.append(&chunk[..n]),
            Err(e) => {
                log::debug!("Output pipe closed with error: {}", e);
                break;
            }
        }
    }
}

async fn collect(task: &mut JoinHandle<()>) {
    match tokio::time::timeout(READER_GRACE, &mut *task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Output reader failed: {}", e),
        Err(_) => {
            log::warn!("Output pipe still open after process exit; keeping what was read");
            task.abort();
        }
    }
}

/// Sends SIGKILL to the process group led by `pid`, if any of it is left.
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kills the child and everything in its process group, then reaps it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);

    if let Err(e) = child.kill().await {
        log::debug!("Failed to kill child process: {}", e);
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    INFRASTRUCTURE_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> ExecutionCommand {
        ExecutionCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_new_creates_work_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let backend = LocalBackend::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(backend.work_dir().is_absolute());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        let result = backend
            .run(&sh("echo out; echo err 1>&2; exit 3"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "out\nerr\n");
        assert!(result.code_file.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_uses_work_dir_as_cwd() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        let result = backend
            .run(&sh("cat marker.txt"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "found");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        let started = std::time::Instant::now();
        let result = backend
            .run(
                &sh("echo started; sleep 30 & sleep 30; echo never"),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(result.is_timeout());
        assert!(result.output.starts_with("started\n"));
        assert!(result.output.contains("Timeout"));
        assert!(!result.output.contains("never"));
        // The backgrounded sleep holds stdout; it must have been killed too.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_job_does_not_swallow_output() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        let started = std::time::Instant::now();
        let result = backend
            .run(&sh("echo hi; sleep 6 &"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hi\n");
        // The leftover sleep is killed rather than waited out.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_job_keeps_partial_output() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        // setsid moves the sleep out of the process group, so only the
        // reader grace period ends the wait.
        let result = backend
            .run(
                &sh("echo kept; command -v setsid >/dev/null && setsid sleep 5 &"),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "kept\n");
    }

    #[tokio::test]
    async fn test_missing_executable_is_infrastructure_failure() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        let command = ExecutionCommand::new("definitely-not-an-interpreter-xyz", vec![]);
        let result = backend.run(&command, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit_code, INFRASTRUCTURE_EXIT_CODE);
        assert!(result.output.contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_of_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code_of(ExitStatus::from_raw(2 << 8)), 2);
    }
}
