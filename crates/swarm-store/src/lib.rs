pub mod client;
pub mod memory;
pub mod session;
pub mod sqlite;

use std::sync::Arc;

use swarm_core::config::{StoreBackend, SwarmConfig};
use swarm_core::error::Result;
use swarm_core::traits::GraphStore;

pub use client::{GraphClient, Scope};
pub use memory::MemoryGraphStore;
pub use session::SessionScope;
pub use sqlite::SqliteGraphStore;

/// Open the backend the config asks for.
pub fn open_store(config: &SwarmConfig) -> Result<Arc<dyn GraphStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryGraphStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteGraphStore::open(&config.store_path())?)),
    }
}
