use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwarmError};
use crate::security::CommandPolicy;
use crate::types::Role;

/// Which graph store backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Namespace holding agents, permissions, rules, approvals and the kill switch.
    #[serde(default = "default_namespace")]
    pub shared_namespace: String,
    /// Namespace a run uses when no session is given.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            shared_namespace: default_namespace(),
            default_namespace: default_namespace(),
        }
    }
}

/// One node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    pub id: String,
    pub handler: Role,
    /// Turn seat; defaults to the handler role's seat.
    #[serde(default)]
    pub seat: Option<usize>,
    /// Permission an agent needs; defaults to the handler role's permission.
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

impl TaskTypeConfig {
    fn new(id: &str, handler: Role, on_success: Option<&str>, on_failure: &str) -> Self {
        Self {
            id: id.to_string(),
            handler,
            seat: None,
            permission: None,
            on_success: on_success.map(str::to_string),
            on_failure: Some(on_failure.to_string()),
        }
    }

    /// The five-stage delivery pipeline.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "RequirementsDefinitionTask",
                Role::ProductManager,
                Some("SystemDesignTask"),
                "RequirementsDefinitionTask",
            ),
            Self::new(
                "SystemDesignTask",
                Role::Architect,
                Some("FeatureImplementationTask"),
                "RequirementsDefinitionTask",
            ),
            Self::new(
                "FeatureImplementationTask",
                Role::Coder,
                Some("CodeReviewTask"),
                "FeatureImplementationTask",
            ),
            Self::new(
                "CodeReviewTask",
                Role::Reviewer,
                Some("DeploymentTask"),
                "FeatureImplementationTask",
            ),
            Self::new("DeploymentTask", Role::Deployer, None, "DeploymentTask"),
        ]
    }

    pub fn effective_seat(&self) -> usize {
        self.seat.unwrap_or_else(|| self.handler.default_seat())
    }

    pub fn effective_permission(&self) -> String {
        self.permission
            .clone()
            .unwrap_or_else(|| self.handler.default_permission().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Let a coder's negotiated peer review stand in for the review step.
    #[serde(default = "default_true")]
    pub negotiation_skip: bool,
    #[serde(default = "TaskTypeConfig::defaults")]
    pub task_types: Vec<TaskTypeConfig>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            max_retries: default_max_retries(),
            negotiation_skip: true,
            task_types: TaskTypeConfig::defaults(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    #[serde(default = "default_turn_poll_ms")]
    pub turn_poll_ms: u64,
    /// Upper bound of random delay added to each poll.
    #[serde(default = "default_turn_jitter_ms")]
    pub turn_jitter_ms: u64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            turn_poll_ms: default_turn_poll_ms(),
            turn_jitter_ms: default_turn_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarRoomConfig {
    /// Bound on concurrently running subtasks; unbounded when absent.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default = "default_supported_stacks")]
    pub supported_stacks: Vec<String>,
    #[serde(default = "default_stack")]
    pub default_stack: String,
    #[serde(default = "default_entry")]
    pub task_type: String,
}

impl Default for WarRoomConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            supported_stacks: default_supported_stacks(),
            default_stack: default_stack(),
            task_type: default_entry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_approval_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub policy: CommandPolicy,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
            poll_interval_secs: default_approval_poll(),
            command_timeout_secs: default_command_timeout(),
            policy: CommandPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// External process speaking JSON over stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_process_timeout")]
    pub timeout_secs: u64,
}

/// Extra agent registered in the catalog at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub specialties: Vec<String>,
    /// Overrides the role's permissions.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

/// A hard constraint attached to a role or a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub stack: Option<String>,
    pub rule: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub council: CouncilConfig,
    #[serde(default)]
    pub war_room: WarRoomConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Keyed by role name, e.g. `[workers.coder]`.
    #[serde(default)]
    pub workers: HashMap<String, ProcessConfig>,
    #[serde(default)]
    pub decomposer: Option<ProcessConfig>,
    #[serde(default)]
    pub researcher: Option<ProcessConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_true() -> bool { true }
fn default_store_path() -> String { "~/.swarm/graph.db".to_string() }
fn default_namespace() -> String { crate::types::Namespace::DEFAULT.to_string() }
fn default_entry() -> String { "FeatureImplementationTask".to_string() }
fn default_max_retries() -> u32 { 3 }
fn default_turn_poll_ms() -> u64 { 2000 }
fn default_turn_jitter_ms() -> u64 { 250 }
fn default_stack() -> String { "python".to_string() }
fn default_approval_timeout() -> u64 { 600 }
fn default_approval_poll() -> u64 { 5 }
fn default_command_timeout() -> u64 { 120 }
fn default_process_timeout() -> u64 { 300 }

fn default_supported_stacks() -> Vec<String> {
    ["python", "rust", "typescript", "javascript"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl SwarmConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SwarmError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| SwarmError::Config(e.to_string()))
    }

    /// Load when the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// `~/.swarm/config.toml`
    pub fn default_path() -> PathBuf {
        expand_home("~/.swarm/config.toml")
    }

    /// Resolve the SQLite path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    /// Worker process for a role, looked up by lowercase or canonical name.
    pub fn worker_for(&self, role: Role) -> Option<&ProcessConfig> {
        self.workers
            .get(&role.as_str().to_lowercase())
            .or_else(|| self.workers.get(role.as_str()))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let var_name: String = chars.by_ref().take_while(|c| *c != '}').collect();
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim.
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SWARM_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SWARM_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SWARM_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SWARM_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SWARM_VAR}\"");
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: SwarmConfig = toml::from_str("").unwrap();
        assert_eq!(config.workflow.entry, "FeatureImplementationTask");
        assert_eq!(config.workflow.max_retries, 3);
        assert_eq!(config.workflow.task_types.len(), 5);
        assert_eq!(config.council.turn_poll_ms, 2000);
        assert_eq!(config.approval.command_timeout_secs, 120);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.war_room.default_stack, "python");
        assert!(config.notify.telegram.is_none());
    }

    #[test]
    fn default_pipeline_seats_and_transitions() {
        let types = TaskTypeConfig::defaults();
        let review = types.iter().find(|t| t.id == "CodeReviewTask").unwrap();
        assert_eq!(review.effective_seat(), 3);
        assert_eq!(review.effective_permission(), "ReviewCode");
        assert_eq!(review.on_failure.as_deref(), Some("FeatureImplementationTask"));
        let deploy = types.iter().find(|t| t.id == "DeploymentTask").unwrap();
        assert!(deploy.on_success.is_none());
    }

    #[test]
    fn workers_and_rules_parse() {
        let toml_str = r#"
[store]
backend = "memory"

[workers.coder]
command = "python3"
args = ["agents/coder.py"]

[[rules]]
stack = "rust"
rule = "No unwrap in library code"

[[agents]]
name = "RustCoder"
role = "Coder"
specialties = ["rust"]
"#;
        let config: SwarmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        let coder = config.worker_for(Role::Coder).unwrap();
        assert_eq!(coder.args, vec!["agents/coder.py"]);
        assert_eq!(coder.timeout_secs, 300);
        assert!(config.worker_for(Role::Reviewer).is_none());
        assert_eq!(config.rules[0].stack.as_deref(), Some("rust"));
        assert_eq!(config.agents[0].role, Role::Coder);
    }

    #[test]
    fn extra_command_patterns_parse() {
        let toml_str = r#"
[approval]
timeout_secs = 30

[[approval.policy.extra_patterns]]
pattern = "terraform\\s+apply"
label = "infrastructure change"
"#;
        let config: SwarmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.approval.timeout_secs, 30);
        assert_eq!(config.approval.poll_interval_secs, 5);
        assert_eq!(config.approval.policy.extra_patterns.len(), 1);
        assert!(!config.approval.policy.safe_prefixes.is_empty());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SwarmConfig::load(Path::new("/nonexistent/swarm.toml")).unwrap_err();
        assert!(matches!(err, SwarmError::ConfigNotFound(_)));
    }
}
