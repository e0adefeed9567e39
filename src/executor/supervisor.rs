//! Platform seam for subprocess supervision.
//!
//! The executor never talks to the OS directly; it hands a [`ProcessSpec`]
//! to a [`ProcessSupervisor`] and gets a raw [`ProcessOutcome`] back. The
//! platform implementation is selected at build time (POSIX process groups
//! vs. Windows tree termination), and tests inject a mock to prove that
//! blocked and rejected commands never spawn anything.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;

/// Hard ceilings applied at spawn time, before the target program's first
/// instruction executes. Distinct from the wall-clock timeout, which the
/// supervisor enforces itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Address-space ceiling in bytes (RLIMIT_AS).
    pub max_memory_bytes: u64,
    /// CPU-time ceiling in seconds (RLIMIT_CPU). Set slightly above the
    /// wall-clock timeout so it acts as a backstop, not the primary kill.
    pub cpu_time_secs: u64,
    /// Maximum process count (RLIMIT_NPROC, Linux).
    pub max_processes: u32,
    /// Largest file the process may write (RLIMIT_FSIZE).
    pub max_file_size_bytes: u64,
}

/// Everything a supervisor needs to run one command.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// The shell command line to execute.
    pub command: String,
    /// Canonical sandbox root; pinned as the subprocess cwd.
    pub working_directory: PathBuf,
    /// Wall-clock deadline.
    pub timeout: Duration,
    /// Gap between graceful terminate and force kill.
    pub grace_period: Duration,
    pub limits: ResourceLimits,
}

/// Raw result of one supervised run. Output is returned as captured bytes;
/// the executor handles decoding and truncation.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, with exit-by-signal folded to `128 + signo`.
    pub exit_code: i32,
    pub timed_out: bool,
    /// Peak resident set in bytes, best effort (0 where unobservable).
    pub memory_peak_bytes: u64,
    /// User + system CPU seconds, best effort.
    pub cpu_time_seconds: f64,
}

/// The spawn/monitor/terminate contract.
///
/// Implementations must place the command in a fresh process group or
/// session, apply the resource limits before exec, capture (never inherit)
/// stdout/stderr, and on timeout escalate: graceful signal to the whole
/// group, wait out the grace period, then force-kill the group. Pipes are
/// always drained afterwards so no termination path leaks descriptors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, SandboxError>;
}
