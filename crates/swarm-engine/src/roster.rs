use std::collections::HashMap;
use std::sync::Arc;

use swarm_core::config::SwarmConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::traits::Worker;
use swarm_core::types::{Role, WorkerContext, WorkerOutput};

use crate::process::ProcessWorker;

/// Which worker performs each role.
#[derive(Default, Clone)]
pub struct Roster {
    workers: HashMap<Role, Arc<dyn Worker>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process workers for every `[workers.<role>]` section.
    pub fn from_config(config: &SwarmConfig) -> Self {
        let mut roster = Self::new();
        for role in Role::ALL {
            if let Some(process) = config.worker_for(role) {
                roster.register(role, Arc::new(ProcessWorker::new(role, process.clone())));
            }
        }
        roster
    }

    pub fn register(&mut self, role: Role, worker: Arc<dyn Worker>) {
        self.workers.insert(role, worker);
    }

    pub fn with(mut self, role: Role, worker: Arc<dyn Worker>) -> Self {
        self.register(role, worker);
        self
    }

    pub fn get(&self, role: Role) -> Option<Arc<dyn Worker>> {
        self.workers.get(&role).cloned()
    }

    /// Roles that have a worker, in pipeline order.
    pub fn roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| self.workers.contains_key(r))
            .collect()
    }

    /// Dispatch to the role's worker.
    pub async fn execute(&self, role: Role, task: String, ctx: WorkerContext) -> Result<WorkerOutput> {
        let worker = self.get(role).ok_or_else(|| SwarmError::Worker {
            role: role.to_string(),
            message: "no worker registered for role".to_string(),
        })?;
        worker.execute(task, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use swarm_core::config::ProcessConfig;
    use swarm_core::types::Namespace;
    use swarm_test_utils::ScriptedWorker;

    fn ctx(role: Role) -> WorkerContext {
        WorkerContext {
            run_id: "r".into(),
            namespace: Namespace::default(),
            agent: role.to_string(),
            role,
            task_type: "T".into(),
            stack: "python".into(),
            branch: None,
            history: Vec::new(),
            commands: None,
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_worker() {
        let coder = Arc::new(ScriptedWorker::new("coder"));
        let roster = Roster::new().with(Role::Coder, coder.clone());
        let out = roster
            .execute(Role::Coder, "write it".into(), ctx(Role::Coder))
            .await
            .unwrap();
        assert!(out.is_success());
        assert_eq!(coder.tasks(), vec!["write it"]);
    }

    #[tokio::test]
    async fn missing_worker_is_an_error() {
        let err = Roster::new()
            .execute(Role::Deployer, "ship".into(), ctx(Role::Deployer))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Worker { ref role, .. } if role == "Deployer"));
    }

    #[test]
    fn config_workers_become_process_workers() {
        let mut config = SwarmConfig::default();
        config.workers = HashMap::from([(
            "reviewer".to_string(),
            ProcessConfig {
                command: "review-bot".into(),
                args: vec![],
                env: HashMap::new(),
                timeout_secs: 60,
            },
        )]);
        let roster = Roster::from_config(&config);
        assert_eq!(roster.roles(), vec![Role::Reviewer]);
        assert_eq!(roster.get(Role::Reviewer).unwrap().name(), "Reviewer");
    }
}
