use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use swarm_core::types::{
    Namespace, Role, RunMode, RunReport, Subtask, SubtaskReport, SwarmEvent, WorkerOutput,
};

use crate::catalog::AgentStatus;
use crate::orchestrator::{Dispatch, Engine};

impl Engine {
    /// Decompose, then run every subtask concurrently on a stack specialist.
    /// No turn gating; the run succeeds iff every subtask does.
    pub(crate) async fn run_war_room(
        &self,
        run_id: &str,
        description: &str,
        stack: &str,
        namespace: &Namespace,
    ) -> RunReport {
        let subtasks = self.decompose(description, stack).await;
        info!(run_id = %run_id, subtasks = subtasks.len(), "War room launching subtasks");

        let jobs = subtasks
            .into_iter()
            .map(|subtask| self.run_subtask(run_id, namespace, subtask));
        let reports: Vec<SubtaskReport> = match self.config.war_room.max_parallel {
            Some(limit) => stream::iter(jobs).buffered(limit.max(1)).collect().await,
            None => futures::future::join_all(jobs).await,
        };

        let success = !reports.is_empty() && reports.iter().all(|r| r.output.is_success());
        RunReport {
            run_id: run_id.to_string(),
            namespace: namespace.clone(),
            mode: RunMode::WarRoom,
            success,
            history: Vec::new(),
            subtasks: reports,
            aborted: None,
        }
    }

    /// Subtasks from the decomposer, normalized to supported stacks. Falls
    /// back to one subtask covering the whole description.
    async fn decompose(&self, description: &str, stack: &str) -> Vec<Subtask> {
        let settings = &self.config.war_room;
        let whole = || {
            vec![Subtask {
                stack: stack.to_string(),
                description: description.to_string(),
            }]
        };

        let Some(decomposer) = &self.decomposer else {
            return whole();
        };
        let subtasks = match decomposer
            .decompose(description.to_string(), settings.supported_stacks.clone())
            .await
        {
            Ok(subtasks) => subtasks,
            Err(e) => {
                warn!(error = %e, "Decomposition failed, running as a single subtask");
                return whole();
            }
        };

        let normalized: Vec<Subtask> = subtasks
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .map(|s| {
                let requested = s.stack.trim().to_lowercase();
                let stack = if settings
                    .supported_stacks
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(&requested))
                {
                    requested
                } else {
                    warn!(stack = %s.stack, default = %settings.default_stack, "Unsupported stack, using default");
                    settings.default_stack.to_lowercase()
                };
                Subtask {
                    stack,
                    description: s.description,
                }
            })
            .collect();

        if normalized.is_empty() {
            warn!("Decomposer returned no subtasks, running as a single subtask");
            return whole();
        }
        normalized
    }

    async fn run_subtask(&self, run_id: &str, namespace: &Namespace, subtask: Subtask) -> SubtaskReport {
        let Subtask { stack, description } = subtask;
        let task_type = self.config.war_room.task_type.as_str();
        let branch = format!("feat/{}/{}", stack, &Uuid::new_v4().simple().to_string()[..6]);

        if let Err(e) = self.ledger.ensure_stack_knowledge(&stack).await {
            warn!(stack = %stack, error = %e, "Could not seed stack knowledge");
        }

        let agent = match self.catalog.specialized_agent(&stack).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!(stack = %stack, error = %e, "No specialist available");
                return SubtaskReport {
                    agent: crate::catalog::specialist_name(&stack),
                    stack,
                    branch,
                    output: WorkerOutput::failure(e.to_string()),
                };
            }
        };

        if let Err(e) = self.catalog.set_status(&agent, AgentStatus::Busy).await {
            warn!(agent = %agent, error = %e, "Could not mark agent busy");
        }
        info!(run_id = %run_id, agent = %agent, branch = %branch, "Subtask started");

        let output = self
            .dispatch(Dispatch {
                run_id,
                namespace,
                agent: &agent,
                role: Role::Coder,
                task_type,
                task: &description,
                stack: &stack,
                branch: Some(branch.clone()),
                history: &[],
            })
            .await;

        if let Err(e) = self.catalog.set_status(&agent, AgentStatus::Idle).await {
            warn!(agent = %agent, error = %e, "Could not mark agent idle");
        }

        let note = (!output.is_success()).then(|| output.failure_detail());
        if let Err(e) = self
            .ledger
            .record(&agent, task_type, output.status, &stack, note.as_deref())
            .await
        {
            warn!(agent = %agent, error = %e, "Failed to record execution");
        }

        info!(run_id = %run_id, agent = %agent, branch = %branch, outcome = %output.status, "Subtask finished");
        self.event_bus.publish(SwarmEvent::SubtaskCompleted {
            run_id: run_id.to_string(),
            stack: stack.clone(),
            branch: branch.clone(),
            outcome: output.status,
        });

        SubtaskReport {
            stack,
            branch,
            agent,
            output,
        }
    }
}
