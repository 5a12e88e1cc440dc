use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    // Workflow errors
    #[error("No handler role resolved for task type: {0}")]
    UnknownHandler(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Max retries exceeded ({attempts} failures, limit {limit})")]
    MaxRetriesExceeded { attempts: u32, limit: u32 },

    #[error("Security violation: agent {agent} is not authorized for {task_type}")]
    SecurityViolation { agent: String, task_type: String },

    // Worker errors
    #[error("Worker failed: {role}: {message}")]
    Worker { role: String, message: String },

    #[error("Worker timeout after {timeout_secs}s: {role}")]
    WorkerTimeout { role: String, timeout_secs: u64 },

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    // Approval errors
    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("Approval request {id} already resolved as {status}")]
    AlreadyResolved { id: String, status: String },

    #[error("Command rejected by operator (request {id})")]
    ApprovalRejected { id: String },

    #[error("Approval timeout after {timeout_secs}s (request {id})")]
    ApprovalTimeout { id: String, timeout_secs: u64 },

    #[error("Approved command already executed (request {0})")]
    ApprovalConsumed(String),

    #[error("SYSTEM_HALTED: Kill switch active. Execution denied. DO NOT RETRY until system is resumed.")]
    SystemHalted,

    #[error("Command timeout after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    // Notification errors
    #[error("Notification failed: {channel}: {message}")]
    Notify { channel: String, message: String },

    // Storage errors
    #[error("Graph store error: {0}")]
    Store(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwarmError {
    /// Transient failures worth another attempt by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Worker { .. } | Self::WorkerTimeout { .. } | Self::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
