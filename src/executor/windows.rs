//! Windows process supervision.
//!
//! Runs the command under `cmd /C` and terminates the whole subprocess
//! tree with `taskkill /T /F` when the wall-clock deadline passes. POSIX
//! rlimits have no direct equivalent here; the wall-clock timeout and
//! output capture still apply, and the missing ceilings are logged once.

use std::process::Stdio;
use std::sync::Once;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::supervisor::{ProcessOutcome, ProcessSpec, ProcessSupervisor};
use crate::error::SandboxError;

static LIMIT_WARNING: Once = Once::new();

/// Supervisor for Windows targets: tree termination via taskkill.
pub struct WindowsJobSupervisor;

#[async_trait]
impl ProcessSupervisor for WindowsJobSupervisor {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, SandboxError> {
        LIMIT_WARNING.call_once(|| {
            warn!("memory/CPU/process ceilings are not enforced on Windows; only the wall-clock timeout applies");
        });

        let mut child = Command::new("cmd")
            .arg("/C")
            .arg(&spec.command)
            .current_dir(&spec.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SandboxError::Spawn(e)
                }
                _ => SandboxError::Io(e),
            })?;

        let pid = child.id();
        debug!(pid, command = %spec.command, "Spawned sandboxed process");

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(drain(stdout_pipe));
        let stderr_task = tokio::spawn(drain(stderr_pipe));

        let (status, timed_out) = match timeout(spec.timeout, child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                warn!(pid, timeout_secs = spec.timeout.as_secs(), "Command exceeded timeout");
                if let Some(pid) = pid {
                    kill_tree(pid).await;
                }
                // The grace period has no graceful phase here: taskkill /F
                // is already terminal. Reap whatever is left.
                (child.wait().await?, true)
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutcome {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
            timed_out,
            memory_peak_bytes: 0,
            cpu_time_seconds: 0.0,
        })
    }
}

async fn drain(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Force-kill a process and all of its descendants.
async fn kill_tree(pid: u32) {
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!(pid, error = %e, "taskkill failed");
    }
}
