use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::graph::{ShadowQuery, Term, Triple, TriplePattern};
use crate::security::CommandOutput;
use crate::types::*;

/// Append-only, namespace-partitioned triple store.
pub trait GraphStore: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Append facts. Existing facts are never modified.
    fn ingest(&self, namespace: &Namespace, triples: Vec<Triple>) -> BoxFuture<'_, Result<()>>;

    /// All facts matching the pattern, in insertion order.
    fn query(
        &self,
        namespace: &Namespace,
        pattern: TriplePattern,
    ) -> BoxFuture<'_, Result<Vec<Triple>>>;

    /// Whether any fact matches the pattern.
    fn exists(&self, namespace: &Namespace, pattern: TriplePattern) -> BoxFuture<'_, Result<bool>> {
        let fut = self.query(namespace, pattern);
        Box::pin(async move { Ok(!fut.await?.is_empty()) })
    }

    /// Evaluate a "latest event wins" check. Backends that can answer it in a
    /// single query should override this.
    fn ask_active(&self, namespace: &Namespace, query: ShadowQuery) -> BoxFuture<'_, Result<bool>> {
        let namespace = namespace.clone();
        Box::pin(async move {
            let events = self
                .query(
                    &namespace,
                    TriplePattern::any()
                        .predicate(query.scope_predicate.clone())
                        .object(query.scope_object.clone()),
                )
                .await?;

            let mut pairs: Vec<(String, String)> = Vec::new();
            for event in events {
                let facts = self
                    .query(&namespace, TriplePattern::any().subject(event.subject))
                    .await?;
                let literal = |pred: &str| {
                    facts.iter().find_map(|t| match &t.object {
                        Term::Literal(v) if t.predicate == pred => Some(v.clone()),
                        _ => None,
                    })
                };
                if let (Some(state), Some(at)) =
                    (literal(&query.state_predicate), literal(&query.time_predicate))
                {
                    pairs.push((state, at));
                }
            }
            Ok(query.evaluate(pairs.iter().map(|(s, t)| (s.as_str(), t.as_str()))))
        })
    }
}

/// The capability behind a role.
pub trait Worker: Send + Sync + 'static {
    /// Worker name for logs.
    fn name(&self) -> &str;

    /// Perform one task. An `Err` is treated as a failed outcome by the engine.
    fn execute(&self, task: String, ctx: WorkerContext) -> BoxFuture<'_, Result<WorkerOutput>>;
}

/// Splits a description into per-stack subtasks.
pub trait Decomposer: Send + Sync + 'static {
    fn decompose(
        &self,
        description: String,
        supported_stacks: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<Subtask>>>;
}

/// Produces baseline engineering principles for a stack.
pub trait StackResearcher: Send + Sync + 'static {
    fn research(&self, stack: String) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Out-of-band channel to the human operator.
pub trait Notifier: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>>;
}

/// Raw command execution, no policy applied.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: String, timeout: Duration) -> BoxFuture<'_, Result<CommandOutput>>;
}

/// Policy-guarded command execution offered to workers.
pub trait CommandGate: Send + Sync + 'static {
    /// Run a command, waiting for human approval when it is restricted.
    fn run_command(
        &self,
        command: String,
        reason: String,
        requested_by: String,
    ) -> BoxFuture<'_, Result<CommandOutput>>;
}
