//! Shellbox — sandboxed execution core for LLM-driven agents.
//!
//! An autonomous agent that can touch the filesystem and run shell commands
//! needs a hard boundary it cannot talk its way out of. This crate provides
//! that boundary in three pieces:
//! - Path validation confined to a working directory ([`PathValidator`])
//! - Command safety classification ([`CommandClassifier`])
//! - Supervised subprocess execution with resource limits and escalating
//!   termination ([`SecureExecutor`])
//!
//! All three are driven by a single immutable [`SandboxConfig`] per working
//! directory. There is no global state: construct a validator or executor
//! with the config it should enforce, and drop it with the session.
//!
//! Policy rejections (forbidden paths, blocked commands, timeouts) are
//! reported as structured values — [`SandboxViolation`] and
//! [`ExecutionResult`] — so the calling agent can relay them verbatim and
//! self-correct. Only genuine host failures surface as [`SandboxError`].

pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod validator;

pub use classifier::{CommandClassifier, CommandSafety};
pub use config::SandboxConfig;
pub use error::SandboxError;
pub use executor::{ExecOptions, ExecutionResult, SecureExecutor};
pub use validator::{FileOperation, PathValidator, SandboxViolation, ViolationKind};
