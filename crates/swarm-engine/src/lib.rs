pub mod admission;
pub mod catalog;
pub mod control;
pub mod guard;
pub mod learning;
pub mod notify;
pub mod orchestrator;
pub mod process;
pub mod roster;
pub mod runner;
pub mod turn;
pub mod war_room;
pub mod workflow;

pub use admission::AdmissionGate;
pub use catalog::{AgentStatus, Catalog};
pub use control::SystemControl;
pub use guard::CommandGuard;
pub use learning::{compose_prompt, Ledger};
pub use notify::{LogNotifier, TelegramNotifier};
pub use orchestrator::{Engine, EngineBuilder};
pub use process::{ProcessAdapter, ProcessDecomposer, ProcessResearcher, ProcessWorker};
pub use roster::Roster;
pub use runner::ShellRunner;
pub use turn::TurnCoordinator;
pub use workflow::{TaskType, Workflow};
