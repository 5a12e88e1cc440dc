use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::{ApprovalStatus, SystemStatus};
use crate::traits::CommandGate;

/// Name of an isolated partition of the graph store.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl Namespace {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fresh namespace for a run that did not ask for a session.
    pub fn ephemeral() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Functional role that handles a task type.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Role {
    ProductManager,
    Architect,
    Coder,
    Reviewer,
    Deployer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::ProductManager,
        Role::Architect,
        Role::Coder,
        Role::Reviewer,
        Role::Deployer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductManager => "ProductManager",
            Self::Architect => "Architect",
            Self::Coder => "Coder",
            Self::Reviewer => "Reviewer",
            Self::Deployer => "Deployer",
        }
    }

    /// Seat in the turn rotation when the workflow does not override it.
    pub fn default_seat(&self) -> usize {
        match self {
            Self::ProductManager => 0,
            Self::Architect => 1,
            Self::Coder => 2,
            Self::Reviewer => 3,
            Self::Deployer => 4,
        }
    }

    /// Permission a role holds in the built-in catalog.
    pub fn default_permission(&self) -> &'static str {
        match self {
            Self::ProductManager => "DefineRequirements",
            Self::Architect => "DesignArchitecture",
            Self::Coder => "WriteCode",
            Self::Reviewer => "ReviewCode",
            Self::Deployer => "DeployRelease",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "productmanager" | "pm" => Ok(Self::ProductManager),
            "architect" => Ok(Self::Architect),
            "coder" => Ok(Self::Coder),
            "reviewer" => Ok(Self::Reviewer),
            "deployer" => Ok(Self::Deployer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Result state of a step or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Sequential, turn-gated.
    Council,
    /// Decomposed per stack and run concurrently.
    WarRoom,
}

impl RunMode {
    pub const WAR_ROOM_MARKER: &'static str = "[MODE:WAR_ROOM]";
    pub const COUNCIL_MARKER: &'static str = "[MODE:COUNCIL]";

    /// Pick the mode from a marker in the description and return the
    /// description with every marker removed.
    pub fn detect(description: &str) -> (Self, String) {
        let mode = if description.contains(Self::WAR_ROOM_MARKER) {
            Self::WarRoom
        } else {
            Self::Council
        };
        let cleaned = description
            .replace(Self::WAR_ROOM_MARKER, "")
            .replace(Self::COUNCIL_MARKER, "")
            .trim()
            .to_string();
        (mode, cleaned)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Council => f.write_str("council"),
            Self::WarRoom => f.write_str("war_room"),
        }
    }
}

/// Verdict a coder obtained from a reviewer peer before returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerReview {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// What a worker hands back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub status: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_review: Option<PeerReview>,
    /// Anything else the worker reported.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkerOutput {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            status: Outcome::Success,
            summary: Some(summary.into()),
            issues: Vec::new(),
            error: None,
            peer_review: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: Outcome::Failure,
            summary: None,
            issues: Vec::new(),
            error: Some(error.into()),
            peer_review: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_peer_review(mut self, review: PeerReview) -> Self {
        self.peer_review = Some(review);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Human-readable reason for a failed step.
    pub fn failure_detail(&self) -> String {
        if let Some(err) = &self.error {
            return err.clone();
        }
        if !self.issues.is_empty() {
            return self.issues.join("; ");
        }
        self.summary
            .clone()
            .unwrap_or_else(|| "worker reported failure without detail".to_string())
    }
}

impl From<&PeerReview> for WorkerOutput {
    fn from(review: &PeerReview) -> Self {
        let mut output = if review.approved {
            WorkerOutput::success("approved during peer negotiation")
        } else {
            let mut out = WorkerOutput::failure("rejected during peer negotiation");
            if !review.issues.is_empty() {
                out.error = Some(review.issues.join("; "));
            }
            out
        };
        output.issues = review.issues.clone();
        output
            .extra
            .insert("negotiated".to_string(), serde_json::Value::Bool(true));
        output
    }
}

/// Context handed to a worker for one invocation.
#[derive(Clone)]
pub struct WorkerContext {
    pub run_id: String,
    pub namespace: Namespace,
    pub agent: String,
    pub role: Role,
    pub task_type: String,
    pub stack: String,
    pub branch: Option<String>,
    /// Steps completed so far in this run, oldest first. Empty in war room
    /// mode.
    pub history: Vec<HistoryEntry>,
    pub commands: Option<Arc<dyn CommandGate>>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("run_id", &self.run_id)
            .field("namespace", &self.namespace)
            .field("agent", &self.agent)
            .field("role", &self.role)
            .field("task_type", &self.task_type)
            .field("stack", &self.stack)
            .field("branch", &self.branch)
            .field("history", &self.history.len())
            .field("commands", &self.commands.is_some())
            .finish()
    }
}

/// One executed (or negotiated) step of a council run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_type: String,
    pub agent: String,
    pub role: Role,
    pub outcome: Outcome,
    pub output: WorkerOutput,
    pub negotiated: bool,
}

/// Durable record of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub agent: String,
    pub task_type: String,
    pub outcome: Outcome,
    pub stack: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Unit of parallel work produced by decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub stack: String,
    pub description: String,
}

/// Result of one war-room subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub stack: String,
    pub branch: String,
    pub agent: String,
    pub output: WorkerOutput,
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub namespace: Namespace,
    pub mode: RunMode,
    pub success: bool,
    pub history: Vec<HistoryEntry>,
    pub subtasks: Vec<SubtaskReport>,
    /// Why the run stopped before reaching a terminal task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn failed_subtasks(&self) -> usize {
        self.subtasks.iter().filter(|s| !s.output.is_success()).count()
    }
}

/// Severity of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Message sent to the human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub body: String,
}

/// Events published on the engine's bus.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A run started.
    RunStarted { run_id: String, namespace: Namespace, mode: RunMode },
    /// A step is about to be dispatched.
    StepStarted { run_id: String, task_type: String, agent: String },
    /// A step finished.
    StepCompleted { run_id: String, task_type: String, agent: String, outcome: Outcome },
    /// The turn counter moved.
    TurnAdvanced { run_id: String, turn: u64 },
    /// A step failed and the workflow will retry.
    RetryScheduled { run_id: String, attempt: u32, next_task: String },
    /// A war-room subtask finished.
    SubtaskCompleted { run_id: String, stack: String, branch: String, outcome: Outcome },
    /// A run ended.
    RunCompleted { run_id: String, success: bool },
    /// A restricted command is waiting for a human.
    ApprovalRequested { request_id: String, command: String },
    /// A human decided on a restricted command.
    ApprovalResolved { request_id: String, status: ApprovalStatus },
    /// The kill switch changed state.
    SystemStatusChanged { status: SystemStatus, actor: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_detection_strips_markers() {
        let (mode, text) = RunMode::detect("[MODE:WAR_ROOM] Build a todo app");
        assert_eq!(mode, RunMode::WarRoom);
        assert_eq!(text, "Build a todo app");

        let (mode, text) = RunMode::detect("Fix the login bug [MODE:COUNCIL]");
        assert_eq!(mode, RunMode::Council);
        assert_eq!(text, "Fix the login bug");

        let (mode, _) = RunMode::detect("No marker at all");
        assert_eq!(mode, RunMode::Council);
    }

    #[test]
    fn role_parse_is_lenient() {
        assert_eq!("product_manager".parse::<Role>().unwrap(), Role::ProductManager);
        assert_eq!("Coder".parse::<Role>().unwrap(), Role::Coder);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn default_seats_follow_pipeline_order() {
        let seats: Vec<usize> = Role::ALL.iter().map(|r| r.default_seat()).collect();
        assert_eq!(seats, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn worker_output_parses_loose_json() {
        let json = r#"{"status": "failure", "issues": ["missing tests"], "files": ["a.py"]}"#;
        let out: WorkerOutput = serde_json::from_str(json).unwrap();
        assert!(!out.is_success());
        assert_eq!(out.failure_detail(), "missing tests");
        assert!(out.extra.contains_key("files"));
    }

    #[test]
    fn rejected_peer_review_becomes_failure() {
        let review = PeerReview {
            approved: false,
            issues: vec!["no error handling".into()],
        };
        let out = WorkerOutput::from(&review);
        assert_eq!(out.status, Outcome::Failure);
        assert_eq!(out.failure_detail(), "no error handling");
        assert_eq!(out.extra.get("negotiated"), Some(&serde_json::Value::Bool(true)));
    }
}
