//! POSIX process supervision.
//!
//! The command runs under `/bin/bash -c` in a fresh session (`setsid`), so
//! a single `killpg` reaches every descendant — shell pipelines and forked
//! children included. Resource limits go in through `pre_exec`, after fork
//! and before exec, so they bind the target program from its very first
//! instruction. The monitor loop races child exit against the wall-clock
//! deadline while sampling `/proc` for peak-RSS/CPU telemetry on Linux.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use super::supervisor::{ProcessOutcome, ProcessSpec, ProcessSupervisor, ResourceLimits};
use crate::error::SandboxError;

const TELEMETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Supervisor for Unix targets: process groups + rlimits + signals.
pub struct PosixProcessSupervisor;

#[async_trait]
impl ProcessSupervisor for PosixProcessSupervisor {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, SandboxError> {
        let mut command = Command::new("/bin/bash");
        command
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = spec.limits.clone();
        unsafe {
            command.pre_exec(move || {
                // New session: the child's pid becomes the group id, and
                // one signal later reaches the entire subprocess tree.
                nix::unistd::setsid().map_err(nix_to_io)?;
                apply_rlimits(&limits).map_err(nix_to_io)?;
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            // A broken command environment is a result, not a crash.
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                SandboxError::Spawn(e)
            }
            _ => SandboxError::Io(e),
        })?;

        let pid = child.id().map(|p| p as i32);
        debug!(pid, command = %spec.command, "Spawned sandboxed process");

        // Drain both pipes concurrently with the wait: a child writing more
        // than the pipe buffer must never deadlock against our monitor.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(drain(stdout_pipe));
        let stderr_task = tokio::spawn(drain(stderr_pipe));

        let mut peak_rss_bytes = 0u64;
        let mut cpu_seconds = 0f64;

        let deadline = sleep(spec.timeout);
        tokio::pin!(deadline);
        let mut sampler = interval(TELEMETRY_INTERVAL);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (status, timed_out) = loop {
            tokio::select! {
                status = child.wait() => {
                    break (status?, false);
                }
                _ = &mut deadline => {
                    warn!(
                        pid,
                        timeout_secs = spec.timeout.as_secs(),
                        "Command exceeded wall-clock timeout, escalating"
                    );
                    let status = terminate_group(&mut child, pid, spec.grace_period).await?;
                    break (status, true);
                }
                _ = sampler.tick() => {
                    if let Some(pid) = pid {
                        sample_telemetry(pid, &mut peak_rss_bytes, &mut cpu_seconds);
                    }
                }
            }
        };

        // Pipes close once every writer in the group is gone; these joins
        // are also what guarantees no orphan is still holding the pipe.
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutcome {
            stdout,
            stderr,
            exit_code: fold_exit_status(&status),
            timed_out,
            memory_peak_bytes: peak_rss_bytes,
            cpu_time_seconds: cpu_seconds,
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

/// Two-phase group termination: SIGTERM, grace period, SIGKILL.
///
/// The order is load-bearing — skipping the grace period risks corrupting
/// output the target was mid-write on.
async fn terminate_group(
    child: &mut Child,
    pid: Option<i32>,
    grace_period: Duration,
) -> Result<std::process::ExitStatus, SandboxError> {
    signal_group(pid, Signal::SIGTERM);
    match timeout(grace_period, child.wait()).await {
        Ok(status) => Ok(status?),
        Err(_) => {
            warn!(pid, "Process group ignored SIGTERM, sending SIGKILL");
            signal_group(pid, Signal::SIGKILL);
            Ok(child.wait().await?)
        }
    }
}

fn signal_group(pid: Option<i32>, sig: Signal) {
    let Some(pid) = pid else { return };
    // setsid in pre_exec made the child its own group leader.
    if let Err(e) = signal::killpg(Pid::from_raw(pid), sig) {
        if e != nix::errno::Errno::ESRCH {
            debug!(pid, signal = ?sig, error = %e, "killpg failed");
        }
    }
}

/// Apply resource ceilings. Runs post-fork/pre-exec, so only
/// async-signal-safe calls are permitted here.
fn apply_rlimits(limits: &ResourceLimits) -> nix::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(
        Resource::RLIMIT_AS,
        limits.max_memory_bytes,
        limits.max_memory_bytes,
    )?;
    setrlimit(Resource::RLIMIT_CPU, limits.cpu_time_secs, limits.cpu_time_secs)?;

    // RLIMIT_NPROC is not available on macOS.
    #[cfg(target_os = "linux")]
    {
        let nproc = limits.max_processes as u64;
        setrlimit(Resource::RLIMIT_NPROC, nproc, nproc)?;
    }

    setrlimit(
        Resource::RLIMIT_FSIZE,
        limits.max_file_size_bytes,
        limits.max_file_size_bytes,
    )?;

    Ok(())
}

fn nix_to_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

/// Exit-by-signal is folded to the shell convention `128 + signo`.
fn fold_exit_status(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

/// Best-effort peak-RSS and CPU sampling of the direct child.
#[cfg(target_os = "linux")]
fn sample_telemetry(pid: i32, peak_rss_bytes: &mut u64, cpu_seconds: &mut f64) {
    if let Ok(status) = std::fs::read_to_string(format!("/proc/{pid}/status")) {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmHWM:") {
                if let Some(kb) = rest
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    *peak_rss_bytes = (*peak_rss_bytes).max(kb * 1024);
                }
            }
        }
    }

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Skip past the parenthesized comm, which may itself contain
        // spaces; utime/stime are then the 12th and 13th fields.
        if let Some(pos) = stat.rfind(')') {
            let fields: Vec<&str> = stat[pos + 1..].split_whitespace().collect();
            if fields.len() > 12 {
                let ticks = fields[11].parse::<u64>().unwrap_or(0)
                    + fields[12].parse::<u64>().unwrap_or(0);
                let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
                if hz > 0 {
                    *cpu_seconds = (*cpu_seconds).max(ticks as f64 / hz as f64);
                }
            }
        }
    }
}

/// No /proc outside Linux; limits still apply, telemetry reports zero.
#[cfg(not(target_os = "linux"))]
fn sample_telemetry(_pid: i32, _peak_rss_bytes: &mut u64, _cpu_seconds: &mut f64) {}
