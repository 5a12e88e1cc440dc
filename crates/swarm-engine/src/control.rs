use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use swarm_core::error::Result;
use swarm_core::event::EventBus;
use swarm_core::graph::{ShadowQuery, Term, Triple};
use swarm_core::security::SystemStatus;
use swarm_core::types::SwarmEvent;
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

/// Global kill switch backed by status-change events in the shared namespace.
#[derive(Clone)]
pub struct SystemControl {
    graph: GraphClient,
    event_bus: Arc<EventBus>,
}

impl SystemControl {
    pub fn new(graph: GraphClient, event_bus: Arc<EventBus>) -> Self {
        Self { graph, event_bus }
    }

    pub async fn halt(&self, actor: &str) -> Result<()> {
        self.record(SystemStatus::Halted, actor).await?;
        warn!(actor = %actor, "Kill switch engaged, system HALTED");
        Ok(())
    }

    pub async fn resume(&self, actor: &str) -> Result<()> {
        self.record(SystemStatus::Operational, actor).await?;
        info!(actor = %actor, "System resumed, OPERATIONAL");
        Ok(())
    }

    /// HALTED iff some halt event has no strictly later resume event.
    pub async fn status(&self) -> Result<SystemStatus> {
        let halted = self
            .graph
            .ask_active(
                Scope::Shared,
                ShadowQuery {
                    scope_predicate: vocab::RDF_TYPE.to_string(),
                    scope_object: Term::iri(vocab::STATUS_CHANGE_EVENT),
                    state_predicate: vocab::NEW_STATUS.to_string(),
                    time_predicate: vocab::GENERATED_AT_TIME.to_string(),
                    active: SystemStatus::Halted.as_str().to_string(),
                    clearing: SystemStatus::Operational.as_str().to_string(),
                },
            )
            .await?;
        Ok(if halted {
            SystemStatus::Halted
        } else {
            SystemStatus::Operational
        })
    }

    pub async fn is_halted(&self) -> Result<bool> {
        Ok(self.status().await? == SystemStatus::Halted)
    }

    async fn record(&self, status: SystemStatus, actor: &str) -> Result<()> {
        let event = vocab::event_iri(&Uuid::new_v4().to_string());
        self.graph
            .ingest(
                Scope::Shared,
                vec![
                    Triple::iri(&event, vocab::RDF_TYPE, vocab::STATUS_CHANGE_EVENT),
                    Triple::iri(vocab::SYSTEM_CONTROL, vocab::HAS_STATUS_HISTORY, &event),
                    Triple::literal(&event, vocab::NEW_STATUS, status.as_str()),
                    Triple::literal(&event, vocab::GENERATED_AT_TIME, vocab::timestamp(Utc::now())),
                    Triple::literal(&event, vocab::WAS_ATTRIBUTED_TO, actor),
                ],
            )
            .await?;
        self.event_bus.publish(SwarmEvent::SystemStatusChanged {
            status,
            actor: actor.to_string(),
        });
        Ok(())
    }
}
