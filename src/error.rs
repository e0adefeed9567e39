//! Crate error type.
//!
//! Policy rejections are values, not errors: `PathValidator::validate`
//! returns an `Option<SandboxViolation>` and `SecureExecutor::execute`
//! encodes blocked/rejected/timed-out outcomes inside `ExecutionResult`.
//! `SandboxError` covers the remaining cases — call sites that asked for a
//! hard error (`get_safe_path`), construction-time config problems, and
//! host-environment failures that cannot be expressed as a result.

use std::path::PathBuf;

use crate::validator::SandboxViolation;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A path validation failure surfaced as an error on request.
    #[error("sandbox violation: {0}")]
    Violation(SandboxViolation),

    /// The configured working directory is unusable.
    #[error("working directory {path:?} is invalid: {reason}")]
    WorkingDirectory { path: PathBuf, reason: String },

    /// A configured forbidden pattern failed to compile.
    #[error("invalid forbidden pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The subprocess could not be started (missing interpreter, permission
    /// denied). The executor folds this into an `ExecutionResult` with a
    /// populated `error_message`; it only escapes through `get_safe_path`-
    /// style call paths.
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    /// Unexpected OS failure (fd exhaustion, pipe I/O error). Indicates the
    /// host environment is broken, not that the request was unsafe.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// The violation carried by this error, if it is one.
    pub fn violation(&self) -> Option<&SandboxViolation> {
        match self {
            SandboxError::Violation(v) => Some(v),
            _ => None,
        }
    }
}
