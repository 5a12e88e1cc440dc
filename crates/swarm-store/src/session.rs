use std::future::Future;

use swarm_core::types::Namespace;

tokio::task_local! {
    static ACTIVE_NAMESPACE: Namespace;
}

/// Task-local session namespace.
///
/// A run enters a scope and every run-scoped store access made while polling
/// that future resolves to its namespace. The scope is bound to the future, so
/// it ends however the future ends: completion, error, panic or drop.
/// Concurrent runs on the same engine each see only their own namespace.
pub struct SessionScope;

impl SessionScope {
    pub async fn enter<F>(namespace: Namespace, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_NAMESPACE.scope(namespace, fut).await
    }

    /// The namespace of the innermost enclosing scope, if any.
    pub fn current() -> Option<Namespace> {
        ACTIVE_NAMESPACE.try_with(Namespace::clone).ok()
    }
}
