use std::collections::HashSet;

use tracing::{debug, warn};

use swarm_core::error::Result;
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

/// Decides whether an agent may take on a task type.
///
/// Admission holds iff some permission is both held by the agent and required
/// by the task type. A task type that requires nothing admits nobody.
#[derive(Clone)]
pub struct AdmissionGate {
    graph: GraphClient,
}

impl AdmissionGate {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    /// Fails closed: a store error denies.
    pub async fn authorize(&self, agent: &str, task_type: &str) -> bool {
        match self.check(agent, task_type).await {
            Ok(allowed) => {
                debug!(agent = %agent, task_type = %task_type, allowed, "Admission check");
                allowed
            }
            Err(e) => {
                warn!(
                    agent = %agent,
                    task_type = %task_type,
                    error = %e,
                    "Admission check failed, denying"
                );
                false
            }
        }
    }

    async fn check(&self, agent: &str, task_type: &str) -> Result<bool> {
        let held: HashSet<String> = self
            .graph
            .objects(Scope::Shared, &vocab::agent_iri(agent), vocab::HAS_PERMISSION)
            .await?
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect();
        if held.is_empty() {
            return Ok(false);
        }
        let required = self
            .graph
            .objects(
                Scope::Shared,
                &vocab::task_iri(task_type),
                vocab::REQUIRES_PERMISSION,
            )
            .await?;
        Ok(required.iter().any(|p| held.contains(p.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use swarm_core::graph::Triple;
    use swarm_store::MemoryGraphStore;
    use swarm_test_utils::FlakyStore;

    async fn gate_with(triples: Vec<Triple>) -> AdmissionGate {
        let graph = GraphClient::with_defaults(Arc::new(MemoryGraphStore::new()));
        graph.ingest(Scope::Shared, triples).await.unwrap();
        AdmissionGate::new(graph)
    }

    fn perm(agent: &str, p: &str) -> Triple {
        Triple::iri(vocab::agent_iri(agent), vocab::HAS_PERMISSION, vocab::permission_iri(p))
    }

    fn requires(task: &str, p: &str) -> Triple {
        Triple::iri(vocab::task_iri(task), vocab::REQUIRES_PERMISSION, vocab::permission_iri(p))
    }

    #[tokio::test]
    async fn shared_permission_admits() {
        let gate = gate_with(vec![
            perm("Coder", "WriteCode"),
            perm("Coder", "ReadCode"),
            requires("FeatureImplementationTask", "WriteCode"),
        ])
        .await;
        assert!(gate.authorize("Coder", "FeatureImplementationTask").await);
    }

    #[tokio::test]
    async fn disjoint_permissions_deny() {
        let gate = gate_with(vec![
            perm("Reviewer", "ReviewCode"),
            requires("FeatureImplementationTask", "WriteCode"),
        ])
        .await;
        assert!(!gate.authorize("Reviewer", "FeatureImplementationTask").await);
    }

    #[tokio::test]
    async fn task_without_requirements_is_closed() {
        let gate = gate_with(vec![perm("Coder", "WriteCode")]).await;
        assert!(!gate.authorize("Coder", "UnlistedTask").await);
        assert!(!gate.authorize("Ghost", "UnlistedTask").await);
    }

    #[tokio::test]
    async fn admits_exactly_when_permission_sets_intersect() {
        const UNIVERSE: [&str; 6] = [
            "WriteCode",
            "ReviewCode",
            "Deploy",
            "DefineRequirements",
            "DesignSystem",
            "ReadDocs",
        ];
        let mut rng = StdRng::seed_from_u64(0x5a11_0c8e);
        let graph = GraphClient::with_defaults(Arc::new(MemoryGraphStore::new()));
        let gate = AdmissionGate::new(graph.clone());

        for i in 0..300 {
            let agent = format!("Agent{}", i);
            let task = format!("Task{}", i);
            let held: HashSet<&str> = UNIVERSE.into_iter().filter(|_| rng.gen_bool(0.3)).collect();
            let required: HashSet<&str> = UNIVERSE.into_iter().filter(|_| rng.gen_bool(0.3)).collect();

            let mut triples: Vec<Triple> = held.iter().map(|p| perm(&agent, p)).collect();
            triples.extend(required.iter().map(|p| requires(&task, p)));
            graph.ingest(Scope::Shared, triples).await.unwrap();

            let expected = !held.is_disjoint(&required);
            assert_eq!(
                gate.authorize(&agent, &task).await,
                expected,
                "held {:?}, required {:?}",
                held,
                required
            );
        }
    }

    #[tokio::test]
    async fn store_failure_denies() {
        let flaky = Arc::new(FlakyStore::new(MemoryGraphStore::new()));
        let graph = GraphClient::with_defaults(flaky.clone());
        graph
            .ingest(
                Scope::Shared,
                vec![perm("Coder", "WriteCode"), requires("Build", "WriteCode")],
            )
            .await
            .unwrap();
        let gate = AdmissionGate::new(graph);
        assert!(gate.authorize("Coder", "Build").await);

        flaky.fail_next(1);
        assert!(!gate.authorize("Coder", "Build").await);
    }
}
