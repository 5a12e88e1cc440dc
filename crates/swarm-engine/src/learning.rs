use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use swarm_core::error::Result;
use swarm_core::graph::{Term, Triple};
use swarm_core::traits::StackResearcher;
use swarm_core::types::{ExecutionRecord, Outcome, Role};
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

/// Build the text a worker receives: lessons, then constraints, then the task.
pub fn compose_prompt(task: &str, stack: &str, lessons: &[String], rules: &[String]) -> String {
    let mut prompt = String::new();
    if !lessons.is_empty() {
        prompt.push_str("LESSONS LEARNED:\n");
        for lesson in lessons {
            prompt.push_str(&format!("- {}\n", lesson));
        }
        prompt.push('\n');
    }
    if !rules.is_empty() {
        prompt.push_str("HARD CONSTRAINTS:\n");
        for rule in rules {
            prompt.push_str(&format!("- {}\n", rule));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("CONTEXT: Stack={}\n{}", stack, task));
    prompt
}

/// Execution history and the knowledge derived from it.
///
/// Records live in the run namespace; hard constraints live in the shared one.
#[derive(Clone)]
pub struct Ledger {
    graph: GraphClient,
    researcher: Option<Arc<dyn StackResearcher>>,
}

impl Ledger {
    pub fn new(graph: GraphClient) -> Self {
        Self {
            graph,
            researcher: None,
        }
    }

    pub fn with_researcher(mut self, researcher: Arc<dyn StackResearcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }

    /// Persist one invocation. Failures with a note become lessons for the agent.
    pub async fn record(
        &self,
        agent: &str,
        task_type: &str,
        outcome: Outcome,
        stack: &str,
        note: Option<&str>,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            task_type: task_type.to_string(),
            outcome,
            stack: stack.to_lowercase(),
            note: note.map(str::to_string),
            recorded_at: Utc::now(),
        };

        let exec = vocab::execution_iri(&record.id);
        let agent_iri = vocab::agent_iri(agent);
        let mut triples = vec![
            Triple::iri(&exec, vocab::RDF_TYPE, vocab::EXECUTION_RECORD),
            Triple::iri(&exec, vocab::WAS_ASSOCIATED_WITH, &agent_iri),
            Triple::iri(&exec, vocab::RELATED_TASK, vocab::task_iri(task_type)),
            Triple::literal(&exec, vocab::RESULT_STATE, outcome.as_str()),
            Triple::literal(&exec, vocab::HAS_STACK, &record.stack),
            Triple::literal(&exec, vocab::GENERATED_AT_TIME, vocab::timestamp(record.recorded_at)),
        ];
        if let Some(note) = &record.note {
            triples.push(Triple::literal(&exec, vocab::SKOS_HISTORY_NOTE, note));
        }
        if outcome == Outcome::Failure {
            triples.push(Triple::iri(&agent_iri, vocab::LEARNED_FROM, &exec));
        }
        self.graph.ingest(Scope::Run, triples).await?;

        debug!(
            agent = %agent,
            task_type = %task_type,
            outcome = %outcome,
            record = %record.id,
            "Execution recorded"
        );
        Ok(record)
    }

    /// Notes from this agent's unconsolidated failures on this stack.
    pub async fn lessons(&self, agent: &str, stack: &str) -> Result<Vec<String>> {
        let stack = stack.to_lowercase();
        let linked = self
            .graph
            .objects(Scope::Run, &vocab::agent_iri(agent), vocab::LEARNED_FROM)
            .await?;

        let mut lessons = Vec::new();
        for exec in linked {
            let exec = exec.as_str();
            let stacks = self.graph.literals(Scope::Run, exec, vocab::HAS_STACK).await?;
            if !stacks.iter().any(|s| *s == stack) {
                continue;
            }
            let consolidated = self
                .graph
                .literals(Scope::Run, exec, vocab::IS_CONSOLIDATED)
                .await?
                .iter()
                .any(|v| v == "true");
            if consolidated {
                continue;
            }
            lessons.extend(
                self.graph
                    .literals(Scope::Run, exec, vocab::SKOS_HISTORY_NOTE)
                    .await?,
            );
        }
        Ok(lessons)
    }

    /// Hard constraints attached to the role or the stack.
    pub async fn golden_rules(&self, role: Role, stack: &str) -> Result<Vec<String>> {
        let mut rules = self
            .graph
            .literals(
                Scope::Shared,
                &vocab::role_iri(role.as_str()),
                vocab::HARD_CONSTRAINT,
            )
            .await?;
        for rule in self
            .graph
            .literals(Scope::Shared, &vocab::stack_iri(stack), vocab::HARD_CONSTRAINT)
            .await?
        {
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Hide a record's lesson once it has been folded into a hard constraint.
    pub async fn mark_consolidated(&self, record_id: &str) -> Result<()> {
        self.graph
            .ingest(
                Scope::Run,
                vec![Triple::literal(
                    vocab::execution_iri(record_id),
                    vocab::IS_CONSOLIDATED,
                    "true",
                )],
            )
            .await
    }

    /// All records of an agent in the run namespace, oldest first.
    pub async fn records_for(&self, agent: &str) -> Result<Vec<ExecutionRecord>> {
        let execs = self
            .graph
            .subjects(
                Scope::Run,
                vocab::WAS_ASSOCIATED_WITH,
                Term::iri(vocab::agent_iri(agent)),
            )
            .await?;

        let mut records = Vec::new();
        for exec in execs {
            let lit = |p: &'static str| {
                let exec = exec.clone();
                async move { self.graph.literal(Scope::Run, &exec, p).await }
            };
            let outcome = lit(vocab::RESULT_STATE)
                .await?
                .and_then(|s| Outcome::parse(&s))
                .unwrap_or(Outcome::Failure);
            let task_type = self
                .graph
                .objects(Scope::Run, &exec, vocab::RELATED_TASK)
                .await?
                .first()
                .map(|t| vocab::local_name(t.as_str()).to_string())
                .unwrap_or_default();
            let recorded_at = lit(vocab::GENERATED_AT_TIME)
                .await?
                .and_then(|s| vocab::parse_timestamp(&s))
                .unwrap_or_else(Utc::now);
            records.push(ExecutionRecord {
                id: vocab::local_name(&exec).to_string(),
                agent: agent.to_string(),
                task_type,
                outcome,
                stack: lit(vocab::HAS_STACK).await?.unwrap_or_default(),
                note: lit(vocab::SKOS_HISTORY_NOTE).await?,
                recorded_at,
            });
        }
        records.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(records)
    }

    /// Seed hard constraints for a stack that has none. Returns how many were added.
    pub async fn ensure_stack_knowledge(&self, stack: &str) -> Result<usize> {
        let stack_iri = vocab::stack_iri(stack);
        let known = self
            .graph
            .literals(Scope::Shared, &stack_iri, vocab::HARD_CONSTRAINT)
            .await?;
        if !known.is_empty() {
            return Ok(0);
        }
        let Some(researcher) = &self.researcher else {
            return Ok(0);
        };

        info!(stack = %stack, "No constraints for stack, researching principles");
        let principles = match researcher.research(stack.to_string()).await {
            Ok(p) => p,
            Err(e) => {
                warn!(stack = %stack, error = %e, "Stack research failed");
                return Ok(0);
            }
        };
        let triples: Vec<Triple> = principles
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Triple::literal(&stack_iri, vocab::HARD_CONSTRAINT, p))
            .collect();
        let added = triples.len();
        self.graph.ingest(Scope::Shared, triples).await?;
        info!(stack = %stack, added, "Stack principles ingested");
        Ok(added)
    }
}
