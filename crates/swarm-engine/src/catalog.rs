use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use swarm_core::config::{AgentConfig, RuleConfig};
use swarm_core::error::Result;
use swarm_core::graph::{ShadowQuery, Term, Triple};
use swarm_core::types::Role;
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

use crate::workflow::Workflow;

/// Availability of an agent, derived from its latest status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
        }
    }
}

/// Agents, roles, permissions, task types and rules in the shared namespace.
#[derive(Clone)]
pub struct Catalog {
    graph: GraphClient,
}

impl Catalog {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    /// Write the workflow graph, one agent per role, configured agents and
    /// hard constraints. Safe to repeat: facts are idempotent and agents that
    /// already have a status keep it.
    pub async fn bootstrap(
        &self,
        workflow: &Workflow,
        agents: &[AgentConfig],
        rules: &[RuleConfig],
    ) -> Result<()> {
        let mut triples = Vec::new();

        for task in workflow.task_types() {
            let task_iri = vocab::task_iri(&task.id);
            triples.push(Triple::iri(&task_iri, vocab::RDF_TYPE, vocab::TASK_TYPE));
            triples.push(Triple::iri(
                &task_iri,
                vocab::HANDLER,
                vocab::role_iri(task.handler.as_str()),
            ));
            triples.push(Triple::iri(
                &task_iri,
                vocab::REQUIRES_PERMISSION,
                vocab::permission_iri(&task.permission),
            ));
            triples.push(Triple::literal(&task_iri, vocab::SEAT, task.seat.to_string()));
            if let Some(next) = &task.on_success {
                triples.push(Triple::iri(&task_iri, vocab::ON_SUCCESS, vocab::task_iri(next)));
            }
            if let Some(next) = &task.on_failure {
                triples.push(Triple::iri(&task_iri, vocab::ON_FAILURE, vocab::task_iri(next)));
            }
        }

        for role in Role::ALL {
            let role_iri = vocab::role_iri(role.as_str());
            for perm in workflow.permissions_for(role) {
                triples.push(Triple::iri(
                    &role_iri,
                    vocab::HAS_PERMISSION,
                    vocab::permission_iri(&perm),
                ));
            }
        }

        for rule in rules {
            if let Some(role) = rule.role {
                triples.push(Triple::literal(
                    vocab::role_iri(role.as_str()),
                    vocab::HARD_CONSTRAINT,
                    &rule.rule,
                ));
            }
            if let Some(stack) = &rule.stack {
                triples.push(Triple::literal(
                    vocab::stack_iri(stack),
                    vocab::HARD_CONSTRAINT,
                    &rule.rule,
                ));
            }
        }

        self.graph.ingest(Scope::Shared, triples).await?;

        for role in Role::ALL {
            self.register_agent(role.as_str(), role, None, &[]).await?;
        }
        for agent in agents {
            self.register_agent(
                &agent.name,
                agent.role,
                agent.permissions.as_deref(),
                &agent.specialties,
            )
            .await?;
        }

        info!(
            task_types = workflow.task_types().count(),
            agents = Role::ALL.len() + agents.len(),
            rules = rules.len(),
            "Catalog bootstrapped"
        );
        Ok(())
    }

    /// Register an agent. Without explicit permissions it inherits its role's.
    pub async fn register_agent(
        &self,
        name: &str,
        role: Role,
        permissions: Option<&[String]>,
        specialties: &[String],
    ) -> Result<()> {
        let agent_iri = vocab::agent_iri(name);
        let role_iri = vocab::role_iri(role.as_str());

        let permission_iris: Vec<String> = match permissions {
            Some(perms) => perms.iter().map(|p| vocab::permission_iri(p)).collect(),
            None => self
                .graph
                .objects(Scope::Shared, &role_iri, vocab::HAS_PERMISSION)
                .await?
                .into_iter()
                .map(|t| t.as_str().to_string())
                .collect(),
        };

        let mut triples = vec![
            Triple::iri(&agent_iri, vocab::RDF_TYPE, vocab::AGENT),
            Triple::iri(&agent_iri, vocab::HAS_ROLE, &role_iri),
        ];
        for perm in permission_iris {
            triples.push(Triple::iri(&agent_iri, vocab::HAS_PERMISSION, perm));
        }
        for specialty in specialties {
            triples.push(Triple::literal(
                &agent_iri,
                vocab::SPECIALTY,
                specialty.to_lowercase(),
            ));
        }
        self.graph.ingest(Scope::Shared, triples).await?;

        let has_status = !self
            .graph
            .subjects(Scope::Shared, vocab::STATUS_OF, Term::iri(&agent_iri))
            .await?
            .is_empty();
        if !has_status {
            self.set_status(name, AgentStatus::Idle).await?;
        }
        debug!(agent = %name, role = %role, "Agent registered");
        Ok(())
    }

    /// Handler role of a task type, read from the graph.
    pub async fn handler_for(&self, task_type: &str) -> Result<Option<Role>> {
        let handlers = self
            .graph
            .objects(Scope::Shared, &vocab::task_iri(task_type), vocab::HANDLER)
            .await?;
        Ok(handlers
            .iter()
            .find_map(|h| vocab::local_name(h.as_str()).parse::<Role>().ok()))
    }

    /// The generic agent for a role: the one named after it, else any holder.
    pub async fn agent_for_role(&self, role: Role) -> Result<Option<String>> {
        let holders = self
            .graph
            .subjects(
                Scope::Shared,
                vocab::HAS_ROLE,
                Term::iri(vocab::role_iri(role.as_str())),
            )
            .await?;
        let canonical = vocab::agent_iri(role.as_str());
        let chosen = holders
            .iter()
            .find(|a| **a == canonical)
            .or_else(|| holders.first());
        Ok(chosen.map(|a| vocab::local_name(a).to_string()))
    }

    pub async fn role_of(&self, agent: &str) -> Result<Option<Role>> {
        let roles = self
            .graph
            .objects(Scope::Shared, &vocab::agent_iri(agent), vocab::HAS_ROLE)
            .await?;
        Ok(roles
            .iter()
            .find_map(|r| vocab::local_name(r.as_str()).parse::<Role>().ok()))
    }

    /// An idle agent specialized in `stack`, if any.
    pub async fn find_specialist(&self, stack: &str) -> Result<Option<String>> {
        let candidates = self
            .graph
            .subjects(Scope::Shared, vocab::SPECIALTY, Term::literal(stack.to_lowercase()))
            .await?;
        for agent_iri in candidates {
            let name = vocab::local_name(&agent_iri).to_string();
            if self.status(&name).await? == AgentStatus::Idle {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Specialized coder for a stack: an idle specialist, else `<Stack>Coder`
    /// registered with the Coder role's permissions.
    pub async fn specialized_agent(&self, stack: &str) -> Result<String> {
        if let Some(agent) = self.find_specialist(stack).await? {
            return Ok(agent);
        }
        let name = specialist_name(stack);
        self.register_agent(&name, Role::Coder, None, &[stack.to_string()])
            .await?;
        info!(agent = %name, stack = %stack, "Registered specialized agent");
        Ok(name)
    }

    /// Append a status event; the latest one wins.
    pub async fn set_status(&self, agent: &str, status: AgentStatus) -> Result<()> {
        let event = vocab::event_iri(&Uuid::new_v4().to_string());
        self.graph
            .ingest(
                Scope::Shared,
                vec![
                    Triple::iri(&event, vocab::RDF_TYPE, vocab::AGENT_STATUS_EVENT),
                    Triple::iri(&event, vocab::STATUS_OF, vocab::agent_iri(agent)),
                    Triple::literal(&event, vocab::AGENT_STATUS, status.as_str()),
                    Triple::literal(&event, vocab::GENERATED_AT_TIME, vocab::timestamp(Utc::now())),
                ],
            )
            .await
    }

    pub async fn status(&self, agent: &str) -> Result<AgentStatus> {
        let busy = self
            .graph
            .ask_active(
                Scope::Shared,
                ShadowQuery {
                    scope_predicate: vocab::STATUS_OF.to_string(),
                    scope_object: Term::iri(vocab::agent_iri(agent)),
                    state_predicate: vocab::AGENT_STATUS.to_string(),
                    time_predicate: vocab::GENERATED_AT_TIME.to_string(),
                    active: AgentStatus::Busy.as_str().to_string(),
                    clearing: AgentStatus::Idle.as_str().to_string(),
                },
            )
            .await?;
        Ok(if busy { AgentStatus::Busy } else { AgentStatus::Idle })
    }
}

/// `rust` -> `RustCoder`
pub(crate) fn specialist_name(stack: &str) -> String {
    let mut chars = stack.chars().filter(|c| c.is_ascii_alphanumeric());
    match chars.next() {
        Some(first) => format!(
            "{}{}Coder",
            first.to_ascii_uppercase(),
            chars.collect::<String>().to_lowercase()
        ),
        None => "GeneralCoder".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use swarm_core::config::WorkflowConfig;
    use swarm_store::MemoryGraphStore;

    async fn bootstrapped() -> Catalog {
        let catalog = Catalog::new(GraphClient::with_defaults(Arc::new(MemoryGraphStore::new())));
        let workflow = Workflow::from_config(&WorkflowConfig::default()).unwrap();
        catalog
            .bootstrap(
                &workflow,
                &[],
                &[RuleConfig {
                    role: Some(Role::Coder),
                    stack: None,
                    rule: "Write tests first".into(),
                }],
            )
            .await
            .unwrap();
        catalog
    }

    #[test]
    fn specialist_names() {
        assert_eq!(specialist_name("rust"), "RustCoder");
        assert_eq!(specialist_name("TypeScript"), "TypescriptCoder");
        assert_eq!(specialist_name("c++"), "CCoder");
        assert_eq!(specialist_name(""), "GeneralCoder");
    }

    #[tokio::test]
    async fn handler_and_role_agents_resolve() {
        let catalog = bootstrapped().await;
        assert_eq!(
            catalog.handler_for("CodeReviewTask").await.unwrap(),
            Some(Role::Reviewer)
        );
        assert_eq!(catalog.handler_for("UnknownTask").await.unwrap(), None);
        assert_eq!(
            catalog.agent_for_role(Role::Deployer).await.unwrap().as_deref(),
            Some("Deployer")
        );
        assert_eq!(catalog.role_of("Coder").await.unwrap(), Some(Role::Coder));
    }

    #[tokio::test]
    async fn status_latest_event_wins() {
        let catalog = bootstrapped().await;
        assert_eq!(catalog.status("Coder").await.unwrap(), AgentStatus::Idle);
        catalog.set_status("Coder", AgentStatus::Busy).await.unwrap();
        assert_eq!(catalog.status("Coder").await.unwrap(), AgentStatus::Busy);
        catalog.set_status("Coder", AgentStatus::Idle).await.unwrap();
        assert_eq!(catalog.status("Coder").await.unwrap(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn specialist_registered_once_then_reused() {
        let catalog = bootstrapped().await;
        assert!(catalog.find_specialist("rust").await.unwrap().is_none());

        let agent = catalog.specialized_agent("rust").await.unwrap();
        assert_eq!(agent, "RustCoder");
        assert_eq!(catalog.role_of("RustCoder").await.unwrap(), Some(Role::Coder));
        assert_eq!(
            catalog.find_specialist("Rust").await.unwrap().as_deref(),
            Some("RustCoder")
        );

        let perms = catalog
            .graph()
            .objects(Scope::Shared, &vocab::agent_iri("RustCoder"), vocab::HAS_PERMISSION)
            .await
            .unwrap();
        assert_eq!(perms, vec![Term::iri(vocab::permission_iri("WriteCode"))]);
    }

    #[tokio::test]
    async fn bootstrap_keeps_existing_status() {
        let catalog = bootstrapped().await;
        catalog.set_status("Architect", AgentStatus::Busy).await.unwrap();
        let workflow = Workflow::from_config(&WorkflowConfig::default()).unwrap();
        catalog.bootstrap(&workflow, &[], &[]).await.unwrap();
        assert_eq!(catalog.status("Architect").await.unwrap(), AgentStatus::Busy);
    }
}
