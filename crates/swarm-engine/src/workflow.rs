use std::collections::HashMap;

use swarm_core::config::WorkflowConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::types::{Outcome, Role};

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskType {
    pub id: String,
    pub handler: Role,
    pub seat: usize,
    pub permission: String,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
}

impl TaskType {
    pub fn next(&self, outcome: Outcome) -> Option<&str> {
        match outcome {
            Outcome::Success => self.on_success.as_deref(),
            Outcome::Failure => self.on_failure.as_deref(),
        }
    }
}

/// Validated, immutable task-type graph.
#[derive(Debug, Clone)]
pub struct Workflow {
    entry: String,
    order: Vec<String>,
    types: HashMap<String, TaskType>,
    seats: usize,
}

impl Workflow {
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        if config.task_types.is_empty() {
            return Err(SwarmError::InvalidWorkflow("no task types defined".into()));
        }

        let mut types = HashMap::new();
        let mut order = Vec::new();
        for tc in &config.task_types {
            let task = TaskType {
                id: tc.id.clone(),
                handler: tc.handler,
                seat: tc.effective_seat(),
                permission: tc.effective_permission(),
                on_success: tc.on_success.clone(),
                on_failure: tc.on_failure.clone(),
            };
            if types.insert(tc.id.clone(), task).is_some() {
                return Err(SwarmError::InvalidWorkflow(format!(
                    "duplicate task type: {}",
                    tc.id
                )));
            }
            order.push(tc.id.clone());
        }

        if !types.contains_key(&config.entry) {
            return Err(SwarmError::InvalidWorkflow(format!(
                "entry task type {} is not defined",
                config.entry
            )));
        }

        for task in types.values() {
            for target in [&task.on_success, &task.on_failure].into_iter().flatten() {
                if !types.contains_key(target) {
                    return Err(SwarmError::InvalidWorkflow(format!(
                        "{} transitions to undefined task type {}",
                        task.id, target
                    )));
                }
            }
        }

        let seats = types.values().map(|t| t.seat).max().unwrap_or(0) + 1;

        Ok(Self {
            entry: config.entry.clone(),
            order,
            types,
            seats,
        })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn get(&self, id: &str) -> Option<&TaskType> {
        self.types.get(id)
    }

    /// Number of seats in the turn rotation.
    pub fn seat_count(&self) -> usize {
        self.seats
    }

    /// Task types in declaration order.
    pub fn task_types(&self) -> impl Iterator<Item = &TaskType> {
        self.order.iter().filter_map(|id| self.types.get(id))
    }

    /// Permissions needed by the task types a role handles.
    pub fn permissions_for(&self, role: Role) -> Vec<String> {
        let mut perms: Vec<String> = self
            .task_types()
            .filter(|t| t.handler == role)
            .map(|t| t.permission.clone())
            .collect();
        perms.dedup();
        perms
    }
}
