//! Structured path-validation violations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a path did wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The path could not be resolved at all.
    PathTraversal,
    /// The resolved path lands outside the working directory.
    OutsideWorkingDir,
    /// The path matches a forbidden pattern or an explicit forbidden path.
    ForbiddenPath,
    /// A symlink points (or may point) outside the working directory.
    SymlinkEscape,
    /// The raw path contains bytes or substrings that suggest injection.
    InvalidCharacters,
    /// The target file is larger than the configured write limit.
    FileSizeExceeded,
}

/// One rejected path, with enough context for an agent to self-correct.
///
/// Created fresh per validation call and never mutated; the caller logs it
/// or renders it into an error message. `suggestions` is plain language
/// intended for direct inclusion in an LLM- or user-facing explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxViolation {
    pub kind: ViolationKind,
    pub attempted_path: String,
    pub working_directory: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.suggestions.is_empty() {
            write!(f, " Suggestions: {}", self.suggestions.join("; "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_suggestions() {
        let violation = SandboxViolation {
            kind: ViolationKind::OutsideWorkingDir,
            attempted_path: "../../etc/passwd".to_string(),
            working_directory: "/work".to_string(),
            message: "Path is outside working directory: /etc/passwd".to_string(),
            suggestions: vec!["Use paths relative to /work".to_string()],
        };

        let rendered = violation.to_string();
        assert!(rendered.contains("outside working directory"));
        assert!(rendered.contains("Use paths relative to /work"));
    }

    #[test]
    fn serializes_flat() {
        let violation = SandboxViolation {
            kind: ViolationKind::InvalidCharacters,
            attempted_path: "a\u{0}b".to_string(),
            working_directory: "/work".to_string(),
            message: "bad".to_string(),
            suggestions: vec![],
        };

        let json = serde_json::to_value(&violation).unwrap();
        assert_eq!(json["kind"], "invalid_characters");
        assert_eq!(json["working_directory"], "/work");
    }
}
