pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod security;
pub mod traits;
pub mod types;
pub mod vocab;

pub use config::SwarmConfig;
pub use error::{Result, SwarmError};
pub use event::EventBus;
pub use graph::{ShadowQuery, Term, Triple, TriplePattern};
pub use types::*;
