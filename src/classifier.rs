//! Command safety classification.
//!
//! [`CommandClassifier`] is the second pure decision function of the core:
//! given a shell command string it returns a coarse [`CommandSafety`] tier
//! and, independently, a list of advisory warnings. The tier gates whether
//! execution proceeds automatically (Safe/Moderate), requires explicit
//! opt-in (Dangerous), or is refused outright (Blocked); the warnings are
//! always surfaced to the caller regardless of tier.
//!
//! All tables are compiled once at first use, never per call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Risk tier for a command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSafety {
    /// Read-only introspection.
    Safe,
    /// Limited writes: file creation, package installs, VCS writes.
    Moderate,
    /// System-state modification; requires explicit opt-in.
    Dangerous,
    /// Destructive idioms that are never executed.
    Blocked,
}

/// Destructive idioms refused outright, matched case- and
/// whitespace-insensitively against the whole command.
static BLOCKED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+-rf\s+/(\s|$)",
        r"rm\s+-rf\s+\*",
        // The classic fork bomb, with any spacing.
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        r"chmod\s+-r\s+777\s+/(\s|$)",
        r"mv\s+/\s+/dev/null",
        r"dd\s+if=/dev/(u?random|zero)\s+of=/dev/[a-z]",
        r"mkfs(\.[a-z0-9]+)?\s+/dev/[a-z]",
        r">\s*/dev/sd[a-z]",
        r"del\s+/f\s+/s\s+/q\s+c:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static blocked pattern"))
    .collect()
});

/// Read-only introspection commands.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "dir", "cat", "head", "tail", "less", "more", "grep", "egrep", "fgrep", "find",
    "which", "whereis", "pwd", "whoami", "id", "date", "cal", "uptime", "df", "du", "free",
    "ps", "top", "htop", "env", "printenv", "wc", "file", "stat", "uname", "echo", "type",
    "lscpu", "lsblk",
];

const SAFE_PHRASES: &[&str] = &[
    "git status",
    "git log",
    "git diff",
    "git show",
    "git branch",
];

/// Commands that write files or fetch content but are generally expected.
const MODERATE_COMMANDS: &[&str] = &[
    "mkdir", "touch", "cp", "mv", "chmod", "tee", "ln", "curl", "wget", "make",
];

const MODERATE_PHRASES: &[&str] = &[
    "git add",
    "git commit",
    "git push",
    "git pull",
    "git checkout",
    "git merge",
    "npm install",
    "pip install",
    "pip3 install",
    "yarn install",
    "cargo install",
    "cargo build",
    "cargo test",
    "apt-get install",
    "brew install",
];

/// Commands that can damage the system; require `allow_dangerous`.
const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "fdisk", "mkfs", "mount", "umount", "sudo", "su", "passwd",
    "useradd", "userdel", "groupadd", "usermod", "chown", "systemctl", "service", "init",
    "shutdown", "reboot", "halt", "poweroff", "iptables", "ufw", "firewall-cmd", "kill",
    "killall", "pkill", "format", "diskpart",
];

// Multi-word dangerous idioms live in BLOCKED_PATTERNS; the dangerous tier
// currently matches on leading words only.
const DANGEROUS_PHRASES: &[&str] = &[];

/// Classifies shell command strings against static policy tables.
///
/// Stateless; every method is a pure function of its input.
pub struct CommandClassifier;

impl CommandClassifier {
    /// Classify a command into a safety tier.
    ///
    /// Blocked idioms are checked first against the whole lower-cased
    /// command. Then each pipeline/chain segment is matched by its leading
    /// word or phrase: Safe, then Moderate, then Dangerous. Anything
    /// unrecognized falls back to Moderate — caution, not permissiveness.
    pub fn classify(command: &str) -> CommandSafety {
        let lowered = command.to_lowercase();

        if BLOCKED_PATTERNS.iter().any(|p| p.is_match(&lowered)) {
            return CommandSafety::Blocked;
        }

        let segments = split_segments(&lowered);
        if segments.is_empty() {
            return CommandSafety::Moderate;
        }

        for (phrases, words, tier) in [
            (SAFE_PHRASES, SAFE_COMMANDS, CommandSafety::Safe),
            (MODERATE_PHRASES, MODERATE_COMMANDS, CommandSafety::Moderate),
            (DANGEROUS_PHRASES, DANGEROUS_COMMANDS, CommandSafety::Dangerous),
        ] {
            if segments
                .iter()
                .any(|seg| segment_matches(seg, phrases, words))
            {
                return tier;
            }
        }

        CommandSafety::Moderate
    }

    /// Advisory risk indicators, independent of the tier decision.
    ///
    /// These are surfaced even for Safe/Moderate commands; the calling
    /// agent is expected to relay them verbatim.
    pub fn safety_warnings(command: &str) -> Vec<String> {
        let lowered = command.to_lowercase();
        let mut warnings = Vec::new();

        if lowered.contains("rm") && lowered.contains("-rf") {
            warnings
                .push("Command contains 'rm -rf' which can delete files permanently".to_string());
        }

        if split_segments(&lowered)
            .iter()
            .any(|seg| seg.split_whitespace().next() == Some("sudo"))
        {
            warnings.push("Command uses 'sudo' which requires elevated privileges".to_string());
        }

        if command
            .chars()
            .any(|c| matches!(c, '&' | '|' | ';' | '>' | '<' | '`'))
            || command.contains("$(")
        {
            warnings.push(
                "Command contains shell operators - verify the composition is intentional"
                    .to_string(),
            );
        }

        if lowered.contains("/dev/") {
            warnings.push("Command accesses device files - this can be destructive".to_string());
        }

        const NETWORK_TOOLS: &[&str] = &["curl", "wget", "nc", "netcat", "ssh", "scp", "ftp"];
        if split_segments(&lowered).iter().any(|seg| {
            seg.split_whitespace()
                .next()
                .map(|w| NETWORK_TOOLS.contains(&w))
                .unwrap_or(false)
        }) {
            warnings.push(
                "Command reaches the network - verify the destination is trusted".to_string(),
            );
        }

        warnings
    }
}

/// Split a command on chain/pipeline operators so each sub-command is
/// judged by its own leading word, not by substrings buried in arguments.
fn split_segments(lowered: &str) -> Vec<&str> {
    lowered
        .split(['|', ';'])
        .flat_map(|part| part.split("&&"))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn segment_matches(segment: &str, phrases: &[&str], words: &[&str]) -> bool {
    for phrase in phrases {
        if segment == *phrase || segment.starts_with(&format!("{phrase} ")) {
            return true;
        }
    }
    segment
        .split_whitespace()
        .next()
        .map(|first| words.contains(&first))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_destructive_idioms_regardless_of_case_and_spacing() {
        for cmd in [
            "rm -rf /",
            "  RM   -RF   /  ",
            "rm -rf *",
            ":(){ :|:& };:",
            ":() { : | : & } ; :",
            "chmod -R 777 /",
            "mv / /dev/null",
            "dd if=/dev/random of=/dev/sda",
            "mkfs.ext4 /dev/sda",
            "del /f /s /q C:\\*",
        ] {
            assert_eq!(CommandClassifier::classify(cmd), CommandSafety::Blocked, "{cmd}");
        }
    }

    #[test]
    fn blocked_requires_the_root_target() {
        // rm -rf on a subdirectory is dangerous, not blocked.
        assert_eq!(
            CommandClassifier::classify("rm -rf ./build"),
            CommandSafety::Dangerous
        );
    }

    #[test]
    fn classifies_read_only_commands_safe() {
        for cmd in ["ls -la", "cat README.md", "git status", "pwd", "df -h"] {
            assert_eq!(CommandClassifier::classify(cmd), CommandSafety::Safe, "{cmd}");
        }
    }

    #[test]
    fn classifies_writes_and_installs_moderate() {
        for cmd in [
            "mkdir build",
            "touch notes.txt",
            "git commit -m 'msg'",
            "pip install requests",
            "cargo build --release",
            "curl https://example.com",
        ] {
            assert_eq!(CommandClassifier::classify(cmd), CommandSafety::Moderate, "{cmd}");
        }
    }

    #[test]
    fn classifies_system_modification_dangerous() {
        for cmd in [
            "rm old.log",
            "sudo apt-get upgrade",
            "systemctl restart nginx",
            "kill -9 1234",
            "mount /dev/sdb1 /mnt",
        ] {
            assert_eq!(CommandClassifier::classify(cmd), CommandSafety::Dangerous, "{cmd}");
        }
    }

    #[test]
    fn unknown_commands_fall_back_to_moderate() {
        assert_eq!(
            CommandClassifier::classify("some-custom-tool --flag"),
            CommandSafety::Moderate
        );
        assert_eq!(CommandClassifier::classify("   "), CommandSafety::Moderate);
    }

    #[test]
    fn leading_word_wins_over_embedded_keywords() {
        // 'cat' appears as an argument, but the command is sudo.
        assert_eq!(
            CommandClassifier::classify("sudo cat /etc/shadow"),
            CommandSafety::Dangerous
        );
    }

    #[test]
    fn warnings_flag_sudo_and_metacharacters() {
        let warnings = CommandClassifier::safety_warnings("sudo ls | grep x");
        assert!(warnings.iter().any(|w| w.contains("sudo")));
        assert!(warnings.iter().any(|w| w.contains("shell operators")));
    }

    #[test]
    fn warnings_flag_network_and_devices() {
        let warnings = CommandClassifier::safety_warnings("curl http://example.com");
        assert!(warnings.iter().any(|w| w.contains("network")));

        let warnings = CommandClassifier::safety_warnings("cat /dev/sda");
        assert!(warnings.iter().any(|w| w.contains("device files")));
    }

    #[test]
    fn warnings_flag_recursive_force_delete() {
        let warnings = CommandClassifier::safety_warnings("rm -rf ./build");
        assert!(warnings.iter().any(|w| w.contains("rm -rf")));
    }

    #[test]
    fn warnings_are_independent_of_tier() {
        // Safe tier, but still warned about the pipe.
        assert_eq!(
            CommandClassifier::classify("ls | head"),
            CommandSafety::Safe
        );
        assert!(!CommandClassifier::safety_warnings("ls | head").is_empty());
    }
}
