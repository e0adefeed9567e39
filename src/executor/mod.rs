//! Supervised command execution.
//!
//! [`SecureExecutor`] is the orchestrator: it gates each command through
//! the [`CommandClassifier`], pins the subprocess to the validated sandbox
//! root, runs it under the platform [`ProcessSupervisor`] with resource
//! limits, and folds every outcome into a flat [`ExecutionResult`].
//!
//! Normal failures — blocked commands, rejected dangerous commands,
//! timeouts, non-zero exits, spawn failures — are all encoded in the
//! result, never thrown. Only host-environment breakage (cannot fork,
//! out of descriptors, pipe I/O errors) propagates as [`SandboxError`].
//!
//! One OS process per `execute()` call, awaited to completion; the
//! executor holds no shared mutable state, so concurrent calls are
//! independent.

pub mod supervisor;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::PosixProcessSupervisor as PlatformSupervisor;
#[cfg(windows)]
pub use windows::WindowsJobSupervisor as PlatformSupervisor;

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::{CommandClassifier, CommandSafety};
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::validator::PathValidator;

use supervisor::{ProcessSpec, ProcessSupervisor, ResourceLimits};

/// Flat, serializable record of one execution.
///
/// Field names and types are fixed so the record can be rendered directly
/// into an LLM-facing message or a machine-readable log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub execution_time_seconds: f64,
    pub memory_peak_mb: f64,
    pub cpu_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub safety_warnings: Vec<String>,
}

impl ExecutionResult {
    /// True only for a clean run: exit 0, no timeout, no error message.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.error_message.is_none()
    }

    /// A refusal or failure that never produced process output.
    fn refused(error_message: String, safety_warnings: Vec<String>) -> Self {
        ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 1,
            timed_out: false,
            execution_time_seconds: 0.0,
            memory_peak_mb: 0.0,
            cpu_time_seconds: 0.0,
            error_message: Some(error_message),
            safety_warnings,
        }
    }

    /// Render the result as the plain-language string an agent can relay
    /// verbatim to the model or the user.
    pub fn render_for_llm(&self) -> String {
        if let Some(message) = &self.error_message {
            return format!("Error: {message}");
        }
        if !self.safety_warnings.is_empty() {
            return format!(
                "Output: {}\nWarnings: {}",
                self.stdout,
                self.safety_warnings.join("; ")
            );
        }
        if self.stdout.is_empty() {
            "Command completed successfully (no output)".to_string()
        } else {
            format!("Output: {}", self.stdout)
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Opt-in required to run Dangerous-tier commands.
    pub allow_dangerous: bool,
    /// Replaces the configured wall-clock timeout for this call only.
    pub timeout_override: Option<Duration>,
}

/// Executes commands with classification gating, a pinned working
/// directory, resource limits, and escalating termination.
pub struct SecureExecutor<S: ProcessSupervisor = PlatformSupervisor> {
    config: SandboxConfig,
    validator: PathValidator,
    supervisor: S,
}

impl SecureExecutor<PlatformSupervisor> {
    /// Executor for the platform supervisor selected at build time.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        Self::with_supervisor(config, PlatformSupervisor)
    }
}

impl<S: ProcessSupervisor> SecureExecutor<S> {
    /// Executor with an injected supervisor (tests, instrumentation).
    pub fn with_supervisor(config: SandboxConfig, supervisor: S) -> Result<Self, SandboxError> {
        let validator = PathValidator::new(config.clone())?;
        Ok(SecureExecutor {
            config,
            validator,
            supervisor,
        })
    }

    /// The canonical sandbox root every subprocess is pinned to.
    pub fn working_directory(&self) -> &Path {
        self.validator.working_directory()
    }

    /// The path validator bound to the same config and working directory.
    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    /// Run one command to completion, timeout, or refusal.
    ///
    /// Refusals and failures come back inside the `ExecutionResult`; an
    /// `Err` means the host itself misbehaved.
    pub async fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        let tier = CommandClassifier::classify(command);
        let mut warnings = CommandClassifier::safety_warnings(command);
        debug!(command, tier = ?tier, "Classified command");

        match tier {
            CommandSafety::Blocked => {
                warn!(command, "Refusing blocked command");
                warnings.push("Command is explicitly blocked for security reasons".to_string());
                return Ok(ExecutionResult::refused(
                    format!("Command blocked for security: {command}"),
                    warnings,
                ));
            }
            CommandSafety::Dangerous if !options.allow_dangerous => {
                warn!(command, "Refusing dangerous command without explicit approval");
                warnings.push("Pass allow_dangerous=true to execute this command".to_string());
                return Ok(ExecutionResult::refused(
                    format!("Dangerous command requires explicit approval: {command}"),
                    warnings,
                ));
            }
            _ => {}
        }

        let timeout = options
            .timeout_override
            .unwrap_or_else(|| self.config.timeout());
        let spec = ProcessSpec {
            command: command.to_string(),
            working_directory: self.validator.working_directory().to_path_buf(),
            timeout,
            grace_period: self.config.grace_period(),
            limits: ResourceLimits {
                max_memory_bytes: self.config.max_memory_mb * 1024 * 1024,
                // CPU ceiling sits above the wall clock as a backstop; the
                // supervisor deadline is the primary timeout mechanism.
                cpu_time_secs: timeout.as_secs() + 10,
                max_processes: self.config.max_processes,
                max_file_size_bytes: self.config.max_output_file_bytes,
            },
        };

        let started = Instant::now();
        let outcome = match self.supervisor.run(&spec).await {
            Ok(outcome) => outcome,
            Err(SandboxError::Spawn(e)) => {
                warn!(command, error = %e, "Spawn failed");
                return Ok(ExecutionResult::refused(
                    format!("Failed to start command: {e}"),
                    warnings,
                ));
            }
            Err(e) => return Err(e),
        };
        let execution_time_seconds = started.elapsed().as_secs_f64();

        let stdout = truncate_output(&outcome.stdout, self.config.max_captured_output_bytes);
        let stderr = truncate_output(&outcome.stderr, self.config.max_captured_output_bytes);

        let error_message = if outcome.timed_out {
            Some(format!(
                "Command timed out after {} seconds. Consider breaking the operation into \
                 smaller steps or optimizing the command.",
                timeout.as_secs()
            ))
        } else if outcome.exit_code != 0 {
            let mut message = format!("Command failed with exit code {}.", outcome.exit_code);
            let stderr_trimmed = stderr.trim();
            if !stderr_trimmed.is_empty() {
                message.push_str(&format!(" Error: {stderr_trimmed}"));
            }
            Some(message)
        } else {
            None
        };

        if outcome.timed_out {
            warn!(
                command,
                elapsed = execution_time_seconds,
                "Command timed out and was terminated"
            );
        } else {
            debug!(
                command,
                exit_code = outcome.exit_code,
                elapsed = execution_time_seconds,
                "Command completed"
            );
        }

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            execution_time_seconds,
            memory_peak_mb: outcome.memory_peak_bytes as f64 / (1024.0 * 1024.0),
            cpu_time_seconds: outcome.cpu_time_seconds,
            error_message,
            safety_warnings: warnings,
        })
    }
}

/// Decode captured bytes, truncating past the configured cap with an
/// explicit notice so the agent knows output is incomplete.
fn truncate_output(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[output truncated, {} bytes total]",
        &text[..cut],
        text.len()
    )
}

#[cfg(test)]
mod tests {
    use super::supervisor::{MockProcessSupervisor, ProcessOutcome};
    use super::*;

    fn quick_config(tmp: &tempfile::TempDir) -> SandboxConfig {
        let mut config = SandboxConfig::new(tmp.path()).unwrap();
        config.timeout_secs = 10;
        config.grace_period_secs = 1;
        config
    }

    #[tokio::test]
    async fn blocked_command_never_reaches_supervisor() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mock = MockProcessSupervisor::new();
        mock.expect_run().times(0);
        let executor = SecureExecutor::with_supervisor(quick_config(&tmp), mock).unwrap();

        let result = executor
            .execute("rm -rf /", &ExecOptions::default())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(!result.is_success());
        assert!(result.error_message.as_deref().unwrap().contains("blocked"));
        assert!(!result.safety_warnings.is_empty());
    }

    #[tokio::test]
    async fn dangerous_command_requires_opt_in() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mock = MockProcessSupervisor::new();
        mock.expect_run().times(0);
        let executor = SecureExecutor::with_supervisor(quick_config(&tmp), mock).unwrap();

        let result = executor
            .execute("rm stale.log", &ExecOptions::default())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(
            result
                .error_message
                .as_deref()
                .unwrap()
                .contains("explicit approval")
        );
        assert!(
            result
                .safety_warnings
                .iter()
                .any(|w| w.contains("allow_dangerous"))
        );
    }

    #[tokio::test]
    async fn dangerous_command_runs_with_opt_in() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mock = MockProcessSupervisor::new();
        mock.expect_run().times(1).returning(|_| {
            Ok(ProcessOutcome {
                stdout: b"done\n".to_vec(),
                exit_code: 0,
                ..ProcessOutcome::default()
            })
        });
        let executor = SecureExecutor::with_supervisor(quick_config(&tmp), mock).unwrap();

        let options = ExecOptions {
            allow_dangerous: true,
            ..ExecOptions::default()
        };
        let result = executor.execute("rm stale.log", &options).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.stdout, "done\n");
    }

    #[tokio::test]
    async fn timeout_override_reaches_the_supervisor() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mock = MockProcessSupervisor::new();
        mock.expect_run()
            .withf(|spec| {
                spec.timeout == Duration::from_secs(3) && spec.limits.cpu_time_secs == 13
            })
            .times(1)
            .returning(|_| Ok(ProcessOutcome::default()));
        let executor = SecureExecutor::with_supervisor(quick_config(&tmp), mock).unwrap();

        let options = ExecOptions {
            timeout_override: Some(Duration::from_secs(3)),
            ..ExecOptions::default()
        };
        executor.execute("ls", &options).await.unwrap();
    }

    #[tokio::test]
    async fn render_for_llm_prefers_error_then_warnings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mock = MockProcessSupervisor::new();
        mock.expect_run().times(0);
        let executor = SecureExecutor::with_supervisor(quick_config(&tmp), mock).unwrap();

        let result = executor
            .execute("rm -rf /", &ExecOptions::default())
            .await
            .unwrap();
        assert!(result.render_for_llm().starts_with("Error:"));

        let clean = ExecutionResult {
            stdout: "hello\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            execution_time_seconds: 0.01,
            memory_peak_mb: 0.0,
            cpu_time_seconds: 0.0,
            error_message: None,
            safety_warnings: vec![],
        };
        assert_eq!(clean.render_for_llm(), "Output: hello\n");
    }

    #[test]
    fn result_serializes_flat() {
        let result = ExecutionResult::refused("nope".to_string(), vec!["careful".to_string()]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exit_code"], 1);
        assert_eq!(json["timed_out"], false);
        assert_eq!(json["error_message"], "nope");
        assert_eq!(json["safety_warnings"][0], "careful");
    }

    #[test]
    fn truncation_appends_notice() {
        let big = vec![b'a'; 2048];
        let text = truncate_output(&big, 100);
        assert!(text.starts_with(&"a".repeat(100)));
        assert!(text.contains("[output truncated, 2048 bytes total]"));

        let small = truncate_output(b"ok", 100);
        assert_eq!(small, "ok");
    }

    // End-to-end tests against real processes.
    #[cfg(unix)]
    mod end_to_end {
        use super::*;

        #[tokio::test]
        async fn simple_command_completes() {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::write(tmp.path().join("hello.txt"), b"hi").unwrap();
            let executor = SecureExecutor::new(quick_config(&tmp)).unwrap();

            let result = executor
                .execute("ls -la", &ExecOptions::default())
                .await
                .unwrap();

            assert!(result.is_success(), "{:?}", result.error_message);
            assert_eq!(result.exit_code, 0);
            assert!(!result.timed_out);
            assert!(result.stdout.contains("hello.txt"));
            assert!(result.execution_time_seconds > 0.0);
        }

        #[tokio::test]
        async fn subprocess_cwd_is_the_sandbox_root() {
            let tmp = tempfile::tempdir().unwrap();
            let executor = SecureExecutor::new(quick_config(&tmp)).unwrap();

            let result = executor
                .execute("pwd", &ExecOptions::default())
                .await
                .unwrap();

            assert_eq!(
                result.stdout.trim(),
                executor.working_directory().to_string_lossy()
            );
        }

        #[tokio::test]
        async fn nonzero_exit_produces_advisory() {
            let tmp = tempfile::tempdir().unwrap();
            let executor = SecureExecutor::new(quick_config(&tmp)).unwrap();

            let result = executor
                .execute("echo oops >&2; exit 7", &ExecOptions::default())
                .await
                .unwrap();

            assert_eq!(result.exit_code, 7);
            assert!(!result.is_success());
            let message = result.error_message.unwrap();
            assert!(message.contains("exit code 7"));
            assert!(message.contains("oops"));
        }

        #[tokio::test]
        async fn timeout_terminates_the_whole_process_group() {
            let tmp = tempfile::tempdir().unwrap();
            let executor = SecureExecutor::new(quick_config(&tmp)).unwrap();

            // Background children hold the stdout pipe; if group
            // termination failed, draining would block until they exit on
            // their own and the elapsed assertion would fail.
            let options = ExecOptions {
                timeout_override: Some(Duration::from_secs(1)),
                ..ExecOptions::default()
            };
            let started = std::time::Instant::now();
            let result = executor
                .execute("sleep 30 & sleep 30 & wait", &options)
                .await
                .unwrap();
            let elapsed = started.elapsed();

            assert!(result.timed_out);
            assert!(!result.is_success());
            assert!(
                result
                    .error_message
                    .as_deref()
                    .unwrap()
                    .contains("timed out")
            );
            assert!(
                elapsed < Duration::from_secs(10),
                "group not reaped within timeout + grace: {elapsed:?}"
            );
        }

        #[tokio::test]
        async fn file_size_limit_kills_runaway_writer() {
            let tmp = tempfile::tempdir().unwrap();
            let mut config = quick_config(&tmp);
            config.max_output_file_bytes = 64 * 1024;
            let executor = SecureExecutor::new(config).unwrap();

            let result = executor
                .execute(
                    "head -c 10485760 /dev/zero > big.bin",
                    &ExecOptions::default(),
                )
                .await
                .unwrap();

            // Killed by the rlimit, not the wall clock.
            assert!(!result.timed_out);
            assert_ne!(result.exit_code, 0);
            assert!(result.error_message.is_some());
        }

        #[tokio::test]
        async fn memory_ceiling_fails_oversized_allocation() {
            let tmp = tempfile::tempdir().unwrap();
            let mut config = quick_config(&tmp);
            config.max_memory_mb = 128;
            let executor = SecureExecutor::new(config).unwrap();

            // Pull ~400MB into shell memory; the address-space ceiling
            // fails the allocation long before the wall clock matters.
            let result = executor
                .execute(
                    "x=$(head -c 400000000 /dev/zero | tr '\\0' 'a'); echo ${#x}",
                    &ExecOptions::default(),
                )
                .await
                .unwrap();

            assert!(!result.timed_out);
            assert_ne!(result.exit_code, 0);
        }

        #[tokio::test]
        async fn oversized_output_is_truncated() {
            let tmp = tempfile::tempdir().unwrap();
            let mut config = quick_config(&tmp);
            config.max_captured_output_bytes = 1024;
            let executor = SecureExecutor::new(config).unwrap();

            let result = executor
                .execute("head -c 100000 /dev/zero | tr '\\0' 'a'", &ExecOptions::default())
                .await
                .unwrap();

            assert!(result.is_success());
            assert!(result.stdout.contains("[output truncated"));
        }
    }
}
