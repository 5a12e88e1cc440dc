use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use swarm_core::config::ApprovalConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::event::EventBus;
use swarm_core::graph::{Term, Triple};
use swarm_core::security::{
    ApprovalStatus, CommandApprovalRequest, CommandClass, CommandClassifier, CommandOutcome,
    CommandOutput,
};
use swarm_core::traits::{CommandGate, CommandRunner, Notifier};
use swarm_core::types::{Notification, Severity, SwarmEvent};
use swarm_core::vocab;
use swarm_store::{GraphClient, Scope};

use crate::control::SystemControl;

/// Approval-gated command execution.
///
/// Safe commands run directly. Restricted commands become approval requests
/// in the shared namespace and run only after a recorded APPROVED decision,
/// at most once per request. Nothing runs while the kill switch is engaged.
///
/// Deciding a request and claiming it for execution are each a read followed
/// by a write. Within one process both are serialized; two processes sharing
/// a store can still race, like the turn counter.
pub struct CommandGuard {
    graph: GraphClient,
    classifier: CommandClassifier,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
    control: SystemControl,
    event_bus: Arc<EventBus>,
    approval_timeout: Duration,
    poll_interval: Duration,
    command_timeout: Duration,
    decisions: Mutex<()>,
}

impl CommandGuard {
    pub fn new(
        graph: GraphClient,
        config: &ApprovalConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
        control: SystemControl,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            graph,
            classifier: CommandClassifier::new(&config.policy),
            runner,
            notifier,
            control,
            event_bus,
            approval_timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            decisions: Mutex::new(()),
        }
    }

    pub fn control(&self) -> &SystemControl {
        &self.control
    }

    pub fn classify(&self, command: &str) -> CommandClass {
        self.classifier.classify(command)
    }

    /// Run a safe command or file an approval request for a restricted one.
    pub async fn execute(
        &self,
        command: &str,
        reason: &str,
        requested_by: &str,
    ) -> Result<CommandOutcome> {
        if self.control.is_halted().await? {
            warn!(command = %command, requested_by = %requested_by, "Command denied, system halted");
            return Err(SwarmError::SystemHalted);
        }

        match self.classify(command) {
            CommandClass::Safe => {
                debug!(command = %command, "Safe command, executing directly");
                let output = self
                    .runner
                    .run(command.to_string(), self.command_timeout)
                    .await?;
                Ok(CommandOutcome::Executed(output))
            }
            CommandClass::Restricted { reason: why } => {
                let request_id = self
                    .file_request(command, reason, requested_by, &why)
                    .await?;
                Ok(CommandOutcome::PendingApproval { request_id })
            }
        }
    }

    async fn file_request(
        &self,
        command: &str,
        reason: &str,
        requested_by: &str,
        restriction: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let req = vocab::request_iri(&id);
        self.graph
            .ingest(
                Scope::Shared,
                vec![
                    Triple::iri(&req, vocab::RDF_TYPE, vocab::COMMAND_REQUEST),
                    Triple::literal(&req, vocab::COMMAND_CONTENT, command),
                    Triple::literal(&req, vocab::REQUEST_REASON, reason),
                    Triple::literal(&req, vocab::REQUESTED_BY, requested_by),
                    Triple::literal(&req, vocab::APPROVAL_STATUS, ApprovalStatus::Pending.as_str()),
                    Triple::literal(&req, vocab::GENERATED_AT_TIME, vocab::timestamp(Utc::now())),
                ],
            )
            .await?;

        info!(
            request_id = %id,
            command = %command,
            restriction = %restriction,
            requested_by = %requested_by,
            "Restricted command awaiting approval"
        );
        self.event_bus.publish(SwarmEvent::ApprovalRequested {
            request_id: id.clone(),
            command: command.to_string(),
        });

        let notification = Notification {
            severity: Severity::Critical,
            title: "Approval required".to_string(),
            body: format!(
                "Command: {}\nRestricted: {}\nReason: {}\nRequested by: {}\nRequest ID: {}\n\n/approve {} or /deny {}",
                command, restriction, reason, requested_by, id, id, id
            ),
        };
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(
                notifier = self.notifier.name(),
                request_id = %id,
                error = %e,
                "Failed to notify operator"
            );
        }
        Ok(id)
    }

    /// Full request as stored.
    pub async fn request(&self, id: &str) -> Result<CommandApprovalRequest> {
        let req = vocab::request_iri(id);
        let facts = self
            .graph
            .query(
                Scope::Shared,
                swarm_core::graph::TriplePattern::any().subject(&req),
            )
            .await?;
        if facts.is_empty() {
            return Err(SwarmError::ApprovalNotFound(id.to_string()));
        }
        let literal = |pred: &str| {
            facts.iter().find_map(|t| match &t.object {
                Term::Literal(v) if t.predicate == pred => Some(v.clone()),
                _ => None,
            })
        };
        let statuses: Vec<ApprovalStatus> = facts
            .iter()
            .filter(|t| t.predicate == vocab::APPROVAL_STATUS)
            .filter_map(|t| ApprovalStatus::parse(t.object.as_str()))
            .collect();

        Ok(CommandApprovalRequest {
            id: id.to_string(),
            command: literal(vocab::COMMAND_CONTENT).unwrap_or_default(),
            reason: literal(vocab::REQUEST_REASON).unwrap_or_default(),
            requested_by: literal(vocab::REQUESTED_BY).unwrap_or_default(),
            status: resolve_status(&statuses),
            requested_at: literal(vocab::GENERATED_AT_TIME)
                .and_then(|s| vocab::parse_timestamp(&s))
                .unwrap_or_else(Utc::now),
            decided_by: literal(vocab::WAS_ATTRIBUTED_TO),
        })
    }

    pub async fn check_status(&self, id: &str) -> Result<ApprovalStatus> {
        Ok(self.request(id).await?.status)
    }

    /// Requests still waiting for a human.
    pub async fn pending(&self) -> Result<Vec<CommandApprovalRequest>> {
        let ids = self
            .graph
            .subjects(Scope::Shared, vocab::RDF_TYPE, Term::iri(vocab::COMMAND_REQUEST))
            .await?;
        let mut pending = Vec::new();
        for iri in ids {
            let req = self.request(vocab::local_name(&iri)).await?;
            if req.status == ApprovalStatus::Pending {
                pending.push(req);
            }
        }
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(pending)
    }

    pub async fn approve(&self, id: &str, approver: &str) -> Result<()> {
        self.decide(id, approver, ApprovalStatus::Approved).await
    }

    pub async fn reject(&self, id: &str, approver: &str) -> Result<()> {
        self.decide(id, approver, ApprovalStatus::Rejected).await
    }

    async fn decide(&self, id: &str, approver: &str, status: ApprovalStatus) -> Result<()> {
        let _decisions = self.decisions.lock().await;
        let current = self.check_status(id).await?;
        if current.is_terminal() {
            return Err(SwarmError::AlreadyResolved {
                id: id.to_string(),
                status: current.to_string(),
            });
        }
        let req = vocab::request_iri(id);
        self.graph
            .ingest(
                Scope::Shared,
                vec![
                    Triple::literal(&req, vocab::APPROVAL_STATUS, status.as_str()),
                    Triple::literal(&req, vocab::WAS_ATTRIBUTED_TO, approver),
                ],
            )
            .await?;
        info!(request_id = %id, approver = %approver, status = %status, "Approval decided");
        self.event_bus.publish(SwarmEvent::ApprovalResolved {
            request_id: id.to_string(),
            status,
        });
        Ok(())
    }

    async fn wait_terminal(&self, id: &str) -> Result<ApprovalStatus> {
        loop {
            match self.check_status(id).await? {
                ApprovalStatus::Pending => tokio::time::sleep(self.poll_interval).await,
                status => return Ok(status),
            }
        }
    }

    /// Poll until a human decides, then run the command if approved.
    pub async fn await_decision(&self, id: &str) -> Result<CommandOutput> {
        let status = match tokio::time::timeout(self.approval_timeout, self.wait_terminal(id)).await
        {
            Ok(status) => status?,
            Err(_) => {
                warn!(request_id = %id, "Approval timed out, command not executed");
                return Err(SwarmError::ApprovalTimeout {
                    id: id.to_string(),
                    timeout_secs: self.approval_timeout.as_secs(),
                });
            }
        };

        match status {
            ApprovalStatus::Rejected => Err(SwarmError::ApprovalRejected { id: id.to_string() }),
            ApprovalStatus::Pending => Err(SwarmError::ApprovalTimeout {
                id: id.to_string(),
                timeout_secs: self.approval_timeout.as_secs(),
            }),
            ApprovalStatus::Approved => self.run_approved(id).await,
        }
    }

    async fn run_approved(&self, id: &str) -> Result<CommandOutput> {
        if self.control.is_halted().await? {
            return Err(SwarmError::SystemHalted);
        }
        self.claim(id).await?;

        let command = self.request(id).await?.command;
        info!(request_id = %id, command = %command, "Executing approved command");
        self.runner.run(command, self.command_timeout).await
    }

    /// Mark an approved request as executed; fails if it already was.
    async fn claim(&self, id: &str) -> Result<()> {
        let _decisions = self.decisions.lock().await;
        let req = vocab::request_iri(id);
        let already = !self
            .graph
            .literals(Scope::Shared, &req, vocab::EXECUTED_AT)
            .await?
            .is_empty();
        if already {
            return Err(SwarmError::ApprovalConsumed(id.to_string()));
        }
        self.graph
            .ingest(
                Scope::Shared,
                vec![Triple::literal(&req, vocab::EXECUTED_AT, vocab::timestamp(Utc::now()))],
            )
            .await
    }

    /// `execute` then, for restricted commands, `await_decision`.
    pub async fn execute_with_approval(
        &self,
        command: &str,
        reason: &str,
        requested_by: &str,
    ) -> Result<CommandOutput> {
        match self.execute(command, reason, requested_by).await? {
            CommandOutcome::Executed(output) => Ok(output),
            CommandOutcome::PendingApproval { request_id } => self.await_decision(&request_id).await,
        }
    }
}

/// A request's status: REJECTED wins over APPROVED, either over PENDING.
fn resolve_status(statuses: &[ApprovalStatus]) -> ApprovalStatus {
    if statuses.contains(&ApprovalStatus::Rejected) {
        ApprovalStatus::Rejected
    } else if statuses.contains(&ApprovalStatus::Approved) {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Pending
    }
}

impl CommandGate for CommandGuard {
    fn run_command(
        &self,
        command: String,
        reason: String,
        requested_by: String,
    ) -> BoxFuture<'_, Result<CommandOutput>> {
        Box::pin(async move {
            self.execute_with_approval(&command, &reason, &requested_by)
                .await
        })
    }
}
