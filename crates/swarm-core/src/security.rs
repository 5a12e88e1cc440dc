use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Outcome;

/// Lifecycle of a restricted-command approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global kill-switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemStatus {
    Operational,
    Halted,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operational => "OPERATIONAL",
            Self::Halted => "HALTED",
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A restricted command awaiting (or past) a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandApprovalRequest {
    pub id: String,
    pub command: String,
    pub reason: String,
    pub requested_by: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_by: Option<String>,
}

/// Classification result for a shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandClass {
    Safe,
    Restricted { reason: String },
}

impl CommandClass {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

/// Captured result of a command that actually ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub status: Outcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// What `execute` produced.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Executed(CommandOutput),
    PendingApproval { request_id: String },
}

/// A labelled pattern that makes a command restricted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerousPattern {
    pub pattern: String,
    pub label: String,
}

/// Allow-list and deny-list governing direct command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPolicy {
    /// Command prefixes that may run without approval.
    #[serde(default = "CommandPolicy::default_safe_prefixes")]
    pub safe_prefixes: Vec<String>,

    /// Patterns that always require approval, even for allow-listed prefixes.
    #[serde(default = "CommandPolicy::default_patterns")]
    pub dangerous_patterns: Vec<DangerousPattern>,

    /// Extra patterns appended to the defaults.
    #[serde(default)]
    pub extra_patterns: Vec<DangerousPattern>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            safe_prefixes: Self::default_safe_prefixes(),
            dangerous_patterns: Self::default_patterns(),
            extra_patterns: Vec::new(),
        }
    }
}

impl CommandPolicy {
    pub fn default_safe_prefixes() -> Vec<String> {
        [
            "ls", "grep", "cat", "echo", "pwd", "whoami", "date", "head", "tail", "find", "stat",
            "diff", "npm", "pytest", "python", "python3", "node", "false", "sleep", "pylint",
            "flake8", "bandit",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn default_patterns() -> Vec<DangerousPattern> {
        let p = |pattern: &str, label: &str| DangerousPattern {
            pattern: pattern.to_string(),
            label: label.to_string(),
        };
        vec![
            p(r"\b(rm|mv|cp|dd)\s", "destructive filesystem operation"),
            p(r"\b(mkfs|mount|umount)\b", "filesystem administration"),
            p(r"\b(chmod|chown)\b", "permission change"),
            p(r"\bsudo\b|\bsu\s", "privilege escalation"),
            p(r"\b(systemctl|service)\b", "service control"),
            p(r"\b(kill|pkill|killall)\b", "process control"),
            p(r"\b(apt|apt-get|yum|dnf)\b", "system package manager"),
            p(r"\bnpm\s+(install|i)\b|\bpip3?\s+install\b", "package installation"),
            p(r"\b(docker|docker-compose|kubectl)\b", "container or cluster control"),
            p(r"\bgit\s+push\b", "remote push"),
            p(r"\b(wget|curl|ssh|scp|nc|ncat|netcat)\b", "network egress"),
            p(r">", "output redirection"),
        ]
    }
}

/// Compiled form of a [`CommandPolicy`].
pub struct CommandClassifier {
    safe_prefixes: Vec<String>,
    patterns: Vec<(regex::Regex, String)>,
}

impl CommandClassifier {
    /// Compile the policy. Invalid patterns are skipped with a warning.
    pub fn new(policy: &CommandPolicy) -> Self {
        let patterns = policy
            .dangerous_patterns
            .iter()
            .chain(policy.extra_patterns.iter())
            .filter_map(|p| match regex::Regex::new(&p.pattern) {
                Ok(re) => Some((re, p.label.clone())),
                Err(e) => {
                    tracing::warn!(
                        pattern = %p.pattern,
                        error = %e,
                        "Invalid command pattern regex, skipping"
                    );
                    None
                }
            })
            .collect();
        Self {
            safe_prefixes: policy.safe_prefixes.clone(),
            patterns,
        }
    }

    /// Label of the first deny pattern the command matches.
    pub fn dangerous_label(&self, command: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(command))
            .map(|(_, label)| label.as_str())
    }

    fn allow_listed(&self, command: &str) -> bool {
        self.safe_prefixes.iter().any(|prefix| {
            command == prefix
                || command
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        })
    }

    pub fn classify(&self, command: &str) -> CommandClass {
        let command = command.trim();
        if let Some(label) = self.dangerous_label(command) {
            return CommandClass::Restricted {
                reason: label.to_string(),
            };
        }
        if !self.allow_listed(command) {
            return CommandClass::Restricted {
                reason: "not on the allow-list".to_string(),
            };
        }
        CommandClass::Safe
    }
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new(&CommandPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(class: CommandClass) -> String {
        match class {
            CommandClass::Restricted { reason } => reason,
            CommandClass::Safe => panic!("expected restricted"),
        }
    }

    #[test]
    fn allow_listed_read_only_commands_are_safe() {
        let c = CommandClassifier::default();
        assert!(c.classify("ls -la").is_safe());
        assert!(c.classify("pytest tests/").is_safe());
        assert!(c.classify("grep -rn TODO src").is_safe());
        assert!(c.classify("pwd").is_safe());
        assert!(c.classify("  cat README.md  ").is_safe());
    }

    #[test]
    fn prefix_must_be_token_aligned() {
        let c = CommandClassifier::default();
        assert_eq!(reason(c.classify("lsblk")), "not on the allow-list");
        assert_eq!(reason(c.classify("make build")), "not on the allow-list");
    }

    #[test]
    fn deny_patterns_override_allow_list() {
        let c = CommandClassifier::default();
        assert_eq!(reason(c.classify("echo hi > out.txt")), "output redirection");
        assert_eq!(reason(c.classify("npm install left-pad")), "package installation");
        assert_eq!(
            reason(c.classify("python -m pip install requests")),
            "package installation"
        );
        assert_eq!(
            reason(c.classify("find . -name x -exec rm {} ;")),
            "destructive filesystem operation"
        );
    }

    #[test]
    fn dangerous_commands_are_labelled() {
        let c = CommandClassifier::default();
        assert_eq!(reason(c.classify("rm -rf /tmp/x")), "destructive filesystem operation");
        assert_eq!(reason(c.classify("sudo ls")), "privilege escalation");
        assert_eq!(reason(c.classify("curl https://example.com")), "network egress");
        assert_eq!(reason(c.classify("git push origin main")), "remote push");
        assert_eq!(reason(c.classify("docker run alpine")), "container or cluster control");
    }

    #[test]
    fn words_containing_short_tokens_are_not_flagged() {
        let c = CommandClassifier::default();
        // "nc" and "cp" appear inside these but not as words.
        assert!(c.classify("pytest tests/test_sync.py").is_safe());
        assert!(c.classify("cat scp_notes.txt").is_safe());
    }

    #[test]
    fn invalid_extra_pattern_is_skipped() {
        let policy = CommandPolicy {
            extra_patterns: vec![DangerousPattern {
                pattern: "(unclosed".into(),
                label: "broken".into(),
            }],
            ..Default::default()
        };
        let c = CommandClassifier::new(&policy);
        assert!(c.classify("ls").is_safe());
    }

    #[test]
    fn approval_status_parse() {
        assert_eq!(ApprovalStatus::parse("APPROVED"), Some(ApprovalStatus::Approved));
        assert_eq!(ApprovalStatus::parse("approved"), None);
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
    }
}
