use std::sync::Arc;

use tracing::debug;

use swarm_core::error::Result;
use swarm_core::graph::{ShadowQuery, Term, Triple, TriplePattern};
use swarm_core::traits::GraphStore;
use swarm_core::types::Namespace;

use crate::session::SessionScope;

/// Which namespace a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Catalog and control plane: agents, permissions, rules, approvals, kill switch.
    Shared,
    /// The active session, or the fallback namespace outside any session.
    Run,
}

/// Graph store handle that routes each call to the shared or run namespace.
#[derive(Clone)]
pub struct GraphClient {
    store: Arc<dyn GraphStore>,
    shared: Namespace,
    fallback: Namespace,
}

impl GraphClient {
    pub fn new(store: Arc<dyn GraphStore>, shared: Namespace, fallback: Namespace) -> Self {
        Self {
            store,
            shared,
            fallback,
        }
    }

    /// Shared and fallback namespaces are both `default`.
    pub fn with_defaults(store: Arc<dyn GraphStore>) -> Self {
        Self::new(store, Namespace::default(), Namespace::default())
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn namespace(&self, scope: Scope) -> Namespace {
        match scope {
            Scope::Shared => self.shared.clone(),
            Scope::Run => SessionScope::current().unwrap_or_else(|| self.fallback.clone()),
        }
    }

    pub fn fallback_namespace(&self) -> &Namespace {
        &self.fallback
    }

    pub async fn ingest(&self, scope: Scope, triples: Vec<Triple>) -> Result<()> {
        let ns = self.namespace(scope);
        debug!(namespace = %ns, count = triples.len(), "Ingesting triples");
        self.store.ingest(&ns, triples).await
    }

    pub async fn query(&self, scope: Scope, pattern: TriplePattern) -> Result<Vec<Triple>> {
        self.store.query(&self.namespace(scope), pattern).await
    }

    pub async fn exists(&self, scope: Scope, pattern: TriplePattern) -> Result<bool> {
        self.store.exists(&self.namespace(scope), pattern).await
    }

    pub async fn ask_active(&self, scope: Scope, query: ShadowQuery) -> Result<bool> {
        self.store.ask_active(&self.namespace(scope), query).await
    }

    /// Objects of `subject predicate ?o`.
    pub async fn objects(&self, scope: Scope, subject: &str, predicate: &str) -> Result<Vec<Term>> {
        Ok(self
            .query(scope, TriplePattern::any().subject(subject).predicate(predicate))
            .await?
            .into_iter()
            .map(|t| t.object)
            .collect())
    }

    /// Literal values of `subject predicate ?o`, ignoring IRIs.
    pub async fn literals(&self, scope: Scope, subject: &str, predicate: &str) -> Result<Vec<String>> {
        Ok(self
            .objects(scope, subject, predicate)
            .await?
            .into_iter()
            .filter_map(|o| match o {
                Term::Literal(v) => Some(v),
                Term::Iri(_) => None,
            })
            .collect())
    }

    /// First literal of `subject predicate ?o`.
    pub async fn literal(&self, scope: Scope, subject: &str, predicate: &str) -> Result<Option<String>> {
        Ok(self.literals(scope, subject, predicate).await?.into_iter().next())
    }

    /// Subjects of `?s predicate object`.
    pub async fn subjects(&self, scope: Scope, predicate: &str, object: Term) -> Result<Vec<String>> {
        Ok(self
            .query(scope, TriplePattern::any().predicate(predicate).object(object))
            .await?
            .into_iter()
            .map(|t| t.subject)
            .collect())
    }
}
