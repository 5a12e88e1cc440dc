use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use futures::future::BoxFuture;

use swarm_core::error::{Result, SwarmError};
use swarm_core::graph::{Triple, TriplePattern};
use swarm_core::traits::GraphStore;
use swarm_core::types::Namespace;

#[derive(Default)]
struct Partition {
    triples: Vec<Triple>,
    seen: HashSet<Triple>,
}

/// Process-local graph store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryGraphStore {
    partitions: RwLock<HashMap<Namespace, Partition>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of facts in a namespace.
    pub fn len(&self, namespace: &Namespace) -> usize {
        self.partitions
            .read()
            .map(|p| p.get(namespace).map_or(0, |part| part.triples.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &Namespace) -> bool {
        self.len(namespace) == 0
    }
}

impl GraphStore for MemoryGraphStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn ingest(&self, namespace: &Namespace, triples: Vec<Triple>) -> BoxFuture<'_, Result<()>> {
        let namespace = namespace.clone();
        Box::pin(async move {
            let mut partitions = self
                .partitions
                .write()
                .map_err(|e| SwarmError::Store(e.to_string()))?;
            let partition = partitions.entry(namespace).or_default();
            for triple in triples {
                if partition.seen.insert(triple.clone()) {
                    partition.triples.push(triple);
                }
            }
            Ok(())
        })
    }

    fn query(
        &self,
        namespace: &Namespace,
        pattern: TriplePattern,
    ) -> BoxFuture<'_, Result<Vec<Triple>>> {
        let namespace = namespace.clone();
        Box::pin(async move {
            let partitions = self
                .partitions
                .read()
                .map_err(|e| SwarmError::Store(e.to_string()))?;
            Ok(partitions
                .get(&namespace)
                .map(|p| {
                    p.triples
                        .iter()
                        .filter(|t| pattern.matches(t))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}
