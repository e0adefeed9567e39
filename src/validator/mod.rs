//! Path validation confined to a working directory.
//!
//! [`PathValidator`] is a pure decision function over an immutable
//! [`SandboxConfig`]: given a candidate path and an operation kind it
//! returns either "valid" or a structured [`SandboxViolation`]. Its only
//! side effects are the `stat` calls needed to resolve symlinks and check
//! file sizes — it never spawns anything and never mutates the filesystem.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! injection characters, raw-path forbidden patterns, resolution, symlink
//! escape, working-directory confinement, explicit forbidden paths, and
//! finally size limits for mutating operations.

pub mod violation;

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use regex::Regex;
use tracing::{debug, trace};

use crate::config::{self, SandboxConfig};
use crate::error::SandboxError;

pub use violation::{SandboxViolation, ViolationKind};

/// What the caller intends to do with the path.
///
/// Only mutating operations trigger the existing-file size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Modify,
    Delete,
    Execute,
}

impl FileOperation {
    fn mutates(self) -> bool {
        matches!(
            self,
            FileOperation::Write | FileOperation::Create | FileOperation::Modify
        )
    }
}

/// Validates candidate paths against one working directory's policy.
///
/// Stateless between calls: concurrent validation against the same
/// validator is safe, and identical inputs over an unchanged filesystem
/// produce identical verdicts.
pub struct PathValidator {
    config: SandboxConfig,
    working_dir: PathBuf,
    forbidden_patterns: Vec<Regex>,
    forbidden_exact: Vec<PathBuf>,
    forbidden_globs: Vec<Regex>,
}

impl PathValidator {
    /// Build a validator, canonicalizing the working directory and
    /// compiling the forbidden tables once.
    ///
    /// Forbidden-path entries that are ancestors of (or equal to) the
    /// working directory are pruned: they would otherwise deny the entire
    /// workspace (e.g. the default `/tmp` entry for a workspace under
    /// `/tmp`).
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let working_dir = config::canonicalize_working_directory(&config.working_directory)?;

        let case_flag = if config.case_sensitive { "" } else { "(?i)" };

        let mut forbidden_patterns = Vec::with_capacity(config.forbidden_patterns.len());
        for raw in &config.forbidden_patterns {
            let compiled =
                Regex::new(&format!("{case_flag}{raw}")).map_err(|source| SandboxError::Pattern {
                    pattern: raw.clone(),
                    source,
                })?;
            forbidden_patterns.push(compiled);
        }

        let mut forbidden_exact = Vec::new();
        let mut forbidden_globs = Vec::new();
        for entry in config.expanded_forbidden_paths() {
            let entry_str = entry.to_string_lossy();
            if entry_str.contains('*') {
                // Wildcard entries become anchored prefix regexes,
                // e.g. /home/*/.ssh matches any user's .ssh tree.
                let pattern = format!("{case_flag}^{}", regex::escape(&entry_str).replace(r"\*", ".*"));
                let compiled = Regex::new(&pattern).map_err(|source| SandboxError::Pattern {
                    pattern: entry_str.into_owned(),
                    source,
                })?;
                forbidden_globs.push(compiled);
                continue;
            }

            // Compare canonical forms where possible so /tmp matches its
            // /private/tmp alias on macOS.
            let resolved = entry.canonicalize().unwrap_or(entry);
            if working_dir == resolved || working_dir.starts_with(&resolved) {
                debug!(
                    entry = %resolved.display(),
                    working_dir = %working_dir.display(),
                    "Pruning forbidden path that contains the working directory"
                );
                continue;
            }
            forbidden_exact.push(resolved);
        }

        Ok(PathValidator {
            config,
            working_dir,
            forbidden_patterns,
            forbidden_exact,
            forbidden_globs,
        })
    }

    /// The canonical working directory this validator confines access to.
    pub fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    /// Validate a path for the given operation.
    ///
    /// Returns `None` when the path is safe to use, or the first violation
    /// encountered. Relative paths are anchored at the working directory.
    pub fn validate(
        &self,
        path: impl AsRef<Path>,
        operation: FileOperation,
    ) -> Option<SandboxViolation> {
        match self.check(path.as_ref(), operation) {
            Ok(_) => None,
            Err(violation) => {
                debug!(
                    kind = ?violation.kind,
                    path = %violation.attempted_path,
                    "Path rejected"
                );
                Some(violation)
            }
        }
    }

    /// Resolve a path to a safe absolute form, or fail with a hard error.
    ///
    /// Same checks as [`validate`](Self::validate) (read semantics), for
    /// call sites that want `?` instead of an optional violation.
    pub fn get_safe_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        self.check(path.as_ref(), FileOperation::Read)
            .map_err(SandboxError::Violation)
    }

    /// List files under the working directory that match `pattern` and pass
    /// every validation check, as sorted workdir-relative paths.
    ///
    /// Intended for building "did you mean" suggestions, not bulk access.
    pub fn list_accessible_files(&self, pattern: &str) -> Vec<String> {
        let Ok(matcher) = Pattern::new(pattern) else {
            trace!(pattern, "Ignoring invalid glob pattern");
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut stack = vec![self.working_dir.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    // Symlinks (file_type is un-followed) are skipped here;
                    // cycles through symlinked directories cannot form.
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.working_dir) else {
                    continue;
                };
                let relative_str = relative.to_string_lossy().into_owned();
                if matcher.matches(&relative_str)
                    && self.check(relative, FileOperation::Read).is_ok()
                {
                    found.push(relative_str);
                }
            }
        }

        found.sort();
        found
    }

    /// The full check pipeline. Returns the canonical path on success.
    fn check(&self, raw: &Path, operation: FileOperation) -> Result<PathBuf, SandboxViolation> {
        let raw_str = raw.to_string_lossy();

        // 1. Injection indicators in the raw string.
        if let Some(reason) = invalid_characters(&raw_str) {
            return Err(self.violation(
                ViolationKind::InvalidCharacters,
                &raw_str,
                format!("Path contains invalid or suspicious characters ({reason}): {raw_str}"),
                vec![
                    "Use only alphanumeric characters, hyphens, underscores, dots, and path separators"
                        .to_string(),
                ],
            ));
        }

        // 2. Forbidden patterns, checked pre-resolution so a traversal
        //    toward a not-yet-existing forbidden location is still caught.
        for pattern in &self.forbidden_patterns {
            if pattern.is_match(&raw_str) {
                return Err(self.violation(
                    ViolationKind::ForbiddenPath,
                    &raw_str,
                    format!("Path matches forbidden pattern `{pattern}`: {raw_str}"),
                    vec![
                        "Choose a path that does not touch VCS, cache, or artifact directories"
                            .to_string(),
                    ],
                ));
            }
        }

        // 3. Resolve to absolute, anchored at the working directory.
        let anchored = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.working_dir.join(raw)
        };
        let normalized = normalize_against_fs(&anchored);
        let resolved = match resolve_no_follow(&normalized) {
            Ok(p) => p,
            Err(e) => {
                return Err(self.violation(
                    ViolationKind::PathTraversal,
                    &raw_str,
                    format!("Path resolution failed: {e}"),
                    vec![
                        "Use a valid file path".to_string(),
                        "Check for special characters or encoding issues".to_string(),
                    ],
                ));
            }
        };

        // 4. Symlink escape. The final component is inspected no-follow so
        //    the link itself, not its target, is what gets judged.
        let is_symlink = std::fs::symlink_metadata(&resolved)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink && !self.config.allow_symlinks {
            match std::fs::canonicalize(&resolved) {
                Ok(target) if self.within_working_dir(&target) => {}
                Ok(target) => {
                    return Err(self.violation(
                        ViolationKind::SymlinkEscape,
                        &raw_str,
                        format!(
                            "Symlink points outside working directory: {raw_str} -> {}",
                            target.display()
                        ),
                        vec![
                            "Use direct paths instead of symlinks".to_string(),
                            "Copy the target file into the working directory".to_string(),
                        ],
                    ));
                }
                Err(_) => {
                    return Err(self.violation(
                        ViolationKind::SymlinkEscape,
                        &raw_str,
                        format!("Symlink is broken or creates a loop: {raw_str}"),
                        vec![
                            "Remove the broken symlink".to_string(),
                            "Create a regular file instead".to_string(),
                        ],
                    ));
                }
            }
        }

        // 5. Confinement: component-wise prefix against the canonical
        //    working directory. Never substring containment — /work-evil
        //    must not pass as being inside /work.
        let canonical = std::fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        if !self.within_working_dir(&canonical) {
            let mut suggestions = vec![
                format!("Use paths relative to {}", self.working_dir.display()),
                "Check for '../' path traversal attempts".to_string(),
                "Ensure the path stays within the project directory".to_string(),
            ];
            suggestions.extend(self.suggest_similar(raw));
            return Err(self.violation(
                ViolationKind::OutsideWorkingDir,
                &raw_str,
                format!("Path is outside working directory: {}", canonical.display()),
                suggestions,
            ));
        }

        // 6. Explicit forbidden paths on the canonical form.
        if let Some(matched) = self.matches_forbidden_path(&canonical) {
            return Err(self.violation(
                ViolationKind::ForbiddenPath,
                &raw_str,
                format!("Path is explicitly forbidden ({matched}): {}", canonical.display()),
                vec![
                    "Choose a path in the project workspace".to_string(),
                    "Avoid system and credential directories".to_string(),
                ],
            ));
        }

        // 7. Size limit for mutating operations on existing files. A failed
        //    stat lets the operation proceed; the underlying I/O will
        //    surface the real error. New files are unchecked here — the
        //    executor's RLIMIT_FSIZE is the backstop.
        if operation.mutates() {
            if let Ok(meta) = std::fs::metadata(&canonical) {
                if meta.is_file() && meta.len() > self.config.max_file_size_bytes {
                    return Err(self.violation(
                        ViolationKind::FileSizeExceeded,
                        &raw_str,
                        format!(
                            "File size ({} bytes) exceeds limit ({} bytes)",
                            meta.len(),
                            self.config.max_file_size_bytes
                        ),
                        vec![
                            format!(
                                "Use files smaller than {} bytes",
                                self.config.max_file_size_bytes
                            ),
                            "Split large files into smaller chunks".to_string(),
                        ],
                    ));
                }
            }
        }

        Ok(canonical)
    }

    fn violation(
        &self,
        kind: ViolationKind,
        attempted: &str,
        message: String,
        suggestions: Vec<String>,
    ) -> SandboxViolation {
        SandboxViolation {
            kind,
            attempted_path: attempted.to_string(),
            working_directory: self.working_dir.to_string_lossy().into_owned(),
            message,
            suggestions,
        }
    }

    fn within_working_dir(&self, path: &Path) -> bool {
        if self.config.case_sensitive {
            path == self.working_dir || path.starts_with(&self.working_dir)
        } else {
            let base: Vec<String> = lowered_components(&self.working_dir);
            let candidate: Vec<String> = lowered_components(path);
            candidate.len() >= base.len() && candidate[..base.len()] == base[..]
        }
    }

    /// First forbidden entry the canonical path falls under, if any.
    fn matches_forbidden_path(&self, canonical: &Path) -> Option<String> {
        for entry in &self.forbidden_exact {
            let hit = if self.config.case_sensitive {
                canonical == entry || canonical.starts_with(entry)
            } else {
                let base = lowered_components(entry);
                let candidate = lowered_components(canonical);
                candidate.len() >= base.len() && candidate[..base.len()] == base[..]
            };
            if hit {
                return Some(entry.to_string_lossy().into_owned());
            }
        }

        let canonical_str = canonical.to_string_lossy();
        for glob in &self.forbidden_globs {
            if glob.is_match(&canonical_str) {
                return Some(glob.as_str().to_string());
            }
        }

        None
    }

    /// "did you mean" candidates: accessible files sharing the requested
    /// file name, capped at three.
    fn suggest_similar(&self, raw: &Path) -> Vec<String> {
        let Some(name) = raw.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Vec::new();
        };

        self.list_accessible_files(&format!("*{name}"))
            .into_iter()
            .filter(|rel| {
                Path::new(rel)
                    .file_name()
                    .map(|n| n.to_string_lossy().eq_ignore_ascii_case(&name))
                    .unwrap_or(false)
            })
            .take(3)
            .map(|rel| format!("did you mean: {rel}"))
            .collect()
    }
}

/// Reject NUL bytes, non-whitespace control characters, and substrings
/// that indicate URL-scheme, escape-sequence, or shell injection attempts.
fn invalid_characters(path: &str) -> Option<&'static str> {
    for ch in path.chars() {
        if ch == '\0' {
            return Some("NUL byte");
        }
        if ch.is_control() && !matches!(ch, '\t' | '\n' | '\r') {
            return Some("control character");
        }
    }

    const SUSPICIOUS: &[(&str, &str)] = &[
        ("file://", "URL scheme"),
        ("http://", "URL scheme"),
        ("https://", "URL scheme"),
        ("ftp://", "URL scheme"),
        ("\\\\", "escape sequence"),
        ("\\x", "escape sequence"),
        ("\\u", "escape sequence"),
        ("$(", "command substitution"),
        ("`", "command substitution"),
        ("&", "shell operator"),
        ("|", "shell operator"),
        (";", "shell operator"),
        (">", "shell operator"),
        ("<", "shell operator"),
    ];
    for (needle, reason) in SUSPICIOUS {
        if path.contains(needle) {
            return Some(reason);
        }
    }

    None
}

/// Remove `.` components and resolve `..` the way the OS does.
///
/// A lexical pop is wrong whenever the component being popped is a
/// symlink: `sneaky/../x` with `sneaky -> /elsewhere/sub` reaches
/// `/elsewhere/x`, not the sibling of `sneaky`. So before each pop the
/// built-up prefix is canonicalized through the filesystem, making the
/// pop apply to the symlink's target. Only a `..` inside a non-existent
/// tail (where nothing can be a symlink) is popped lexically. `..` at
/// the root stays at the root, mirroring POSIX resolution.
fn normalize_against_fs(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if let Ok(canonical) = std::fs::canonicalize(&out) {
                    out = canonical;
                }
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize every existing ancestor but keep the final component
/// un-followed, so a trailing symlink can be judged as a symlink.
fn resolve_no_follow(normalized: &Path) -> std::io::Result<PathBuf> {
    match (normalized.parent(), normalized.file_name()) {
        (Some(parent), Some(name)) => Ok(canonicalize_existing_prefix(parent)?.join(name)),
        _ => canonicalize_existing_prefix(normalized),
    }
}

/// Canonicalize the deepest existing ancestor of `path` and rejoin the
/// non-existent tail, mirroring resolution semantics for paths that are
/// about to be created.
fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut tail: Vec<OsString> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        match std::fs::canonicalize(&current) {
            Ok(mut canonical) => {
                for part in tail.iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(_) => match (current.parent(), current.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    current = parent.to_path_buf();
                }
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no resolvable ancestor",
                    ));
                }
            },
        }
    }
}

fn lowered_components(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase())
        .collect()
}
