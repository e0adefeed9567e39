//! Sandbox configuration.
//!
//! One `SandboxConfig` per working-directory session. The struct is plain
//! data: construct it (or deserialize it from whatever config surface the
//! embedding application has), hand it to a [`PathValidator`] or
//! [`SecureExecutor`], and treat it as immutable from then on. Nothing in
//! this crate keeps ambient or global configuration.
//!
//! [`PathValidator`]: crate::validator::PathValidator
//! [`SecureExecutor`]: crate::executor::SecureExecutor

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Security and resource settings for one working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// The trust boundary: all file access is confined to this directory.
    /// Must exist and be a directory.
    pub working_directory: PathBuf,

    /// Maximum size of an existing file that a write/create/modify
    /// operation may target (default: 10 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Absolute paths the sandbox must never touch, regardless of other
    /// rules. Entries may contain `*` wildcards and a leading `~`.
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<PathBuf>,

    /// Regexes matched against the raw, pre-resolution path string:
    /// VCS directories, dependency caches, compiled artifacts.
    #[serde(default = "default_forbidden_patterns")]
    pub forbidden_patterns: Vec<String>,

    /// Whether symlink targets may be trusted as-is. When false, a symlink
    /// is only accepted if its target also resolves inside the working
    /// directory; broken or cyclic symlinks are rejected outright.
    #[serde(default)]
    pub allow_symlinks: bool,

    /// Case-sensitive path comparison (default: true). When false,
    /// forbidden patterns compile with `(?i)` and prefix checks compare
    /// ASCII-case-insensitively.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    /// Wall-clock command timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Seconds between SIGTERM and SIGKILL when a timed-out process
    /// ignores the graceful signal (default: 5).
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Address-space ceiling for spawned commands in MiB (RLIMIT_AS,
    /// default: 512).
    #[serde(default = "default_max_memory")]
    pub max_memory_mb: u64,

    /// Maximum processes a spawned command may fork (RLIMIT_NPROC on
    /// Linux, default: 50).
    #[serde(default = "default_max_processes")]
    pub max_processes: u32,

    /// Largest file a spawned command may write (RLIMIT_FSIZE, default:
    /// 100 MiB). This is the enforced backstop for the validator's
    /// existing-file-only size check.
    #[serde(default = "default_max_output_file")]
    pub max_output_file_bytes: u64,

    /// Captured stdout/stderr beyond this many bytes is truncated with an
    /// explicit notice (default: 1 MiB).
    #[serde(default = "default_max_captured_output")]
    pub max_captured_output_bytes: usize,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    5
}

fn default_max_memory() -> u64 {
    512
}

fn default_max_processes() -> u32 {
    50
}

fn default_max_output_file() -> u64 {
    100 * 1024 * 1024
}

fn default_max_captured_output() -> usize {
    1024 * 1024
}

/// System and credential paths denied by default.
///
/// Entries that turn out to be ancestors of the working directory are
/// pruned by the validator at construction — a workspace under `/tmp`
/// would otherwise never validate anything.
fn default_forbidden_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = [
        "/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev",
        "/var/log", "/tmp", "/root",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();

    if let Some(base) = directories::BaseDirs::new() {
        let home = base.home_dir();
        for cred in [".ssh", ".aws", ".gnupg"] {
            paths.push(home.join(cred));
        }
    }

    paths
}

/// Raw-path patterns rejected before resolution: VCS internals, dependency
/// and build caches, compiled artifacts.
fn default_forbidden_patterns() -> Vec<String> {
    [
        r"(^|/)\.git(/|$)",
        r"(^|/)node_modules(/|$)",
        r"(^|/)__pycache__(/|$)",
        r"(^|/)\.?venv(/|$)",
        r"\.pyc$",
        r"\.(exe|dll|so|dylib)$",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl SandboxConfig {
    /// Build a config with default limits for the given working directory.
    ///
    /// The directory must exist and be a directory; it is canonicalized so
    /// later prefix checks compare like with like.
    pub fn new(working_directory: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let raw = working_directory.as_ref();
        let canonical = canonicalize_working_directory(raw)?;

        Ok(SandboxConfig {
            working_directory: canonical,
            max_file_size_bytes: default_max_file_size(),
            forbidden_paths: default_forbidden_paths(),
            forbidden_patterns: default_forbidden_patterns(),
            allow_symlinks: false,
            case_sensitive: true,
            timeout_secs: default_timeout(),
            grace_period_secs: default_grace_period(),
            max_memory_mb: default_max_memory(),
            max_processes: default_max_processes(),
            max_output_file_bytes: default_max_output_file(),
            max_captured_output_bytes: default_max_captured_output(),
        })
    }

    /// Wall-clock timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// SIGTERM→SIGKILL grace period as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Forbidden paths with `~` expanded to the user's home directory.
    pub(crate) fn expanded_forbidden_paths(&self) -> Vec<PathBuf> {
        self.forbidden_paths
            .iter()
            .map(|p| {
                let s = p.to_string_lossy();
                PathBuf::from(shellexpand::tilde(s.as_ref()).into_owned())
            })
            .collect()
    }
}

/// Canonicalize and sanity-check a working directory.
pub(crate) fn canonicalize_working_directory(path: &Path) -> Result<PathBuf, SandboxError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| SandboxError::WorkingDirectory {
            path: path.to_path_buf(),
            reason: format!("cannot resolve: {e}"),
        })?;

    if !canonical.is_dir() {
        return Err(SandboxError::WorkingDirectory {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new(tmp.path()).unwrap();

        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.grace_period_secs, 5);
        assert_eq!(config.max_memory_mb, 512);
        assert!(!config.allow_symlinks);
        assert!(config.case_sensitive);
        assert!(config.forbidden_paths.contains(&PathBuf::from("/etc")));
        assert!(!config.forbidden_patterns.is_empty());
    }

    #[test]
    fn working_directory_is_canonicalized() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let dotted = tmp.path().join("a").join(".").join("..").join("a");

        let config = SandboxConfig::new(&dotted).unwrap();
        assert_eq!(config.working_directory, nested.canonicalize().unwrap());
    }

    #[test]
    fn missing_working_directory_rejected() {
        let err = SandboxConfig::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, SandboxError::WorkingDirectory { .. }));
    }

    #[test]
    fn file_as_working_directory_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let err = SandboxConfig::new(&file).unwrap_err();
        assert!(matches!(err, SandboxError::WorkingDirectory { .. }));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{"working_directory": "/work"}"#;
        let config: SandboxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.working_directory, PathBuf::from("/work"));
        assert_eq!(config.max_processes, 50);
        assert_eq!(config.max_output_file_bytes, 100 * 1024 * 1024);
    }
}
