use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use swarm_core::config::SwarmConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::event::EventBus;
use swarm_core::traits::{CommandGate, CommandRunner, Decomposer, GraphStore, Notifier, StackResearcher};
use swarm_core::types::{
    HistoryEntry, Namespace, Outcome, Role, RunMode, RunReport, SwarmEvent, WorkerContext,
    WorkerOutput,
};
use swarm_store::{GraphClient, Scope, SessionScope};

use crate::admission::AdmissionGate;
use crate::catalog::Catalog;
use crate::control::SystemControl;
use crate::guard::CommandGuard;
use crate::learning::{compose_prompt, Ledger};
use crate::notify::{LogNotifier, TelegramNotifier};
use crate::process::{ProcessDecomposer, ProcessResearcher};
use crate::roster::Roster;
use crate::runner::ShellRunner;
use crate::turn::TurnCoordinator;
use crate::workflow::{TaskType, Workflow};

/// Assembles an [`Engine`] from config plus optional overrides.
pub struct EngineBuilder {
    config: SwarmConfig,
    store: Option<Arc<dyn GraphStore>>,
    roster: Option<Roster>,
    decomposer: Option<Arc<dyn Decomposer>>,
    researcher: Option<Arc<dyn StackResearcher>>,
    notifier: Option<Arc<dyn Notifier>>,
    runner: Option<Arc<dyn CommandRunner>>,
    event_bus: Option<Arc<EventBus>>,
    bootstrap: bool,
}

impl EngineBuilder {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            store: None,
            roster: None,
            decomposer: None,
            researcher: None,
            notifier: None,
            runner: None,
            event_bus: None,
            bootstrap: true,
        }
    }

    pub fn store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn roster(mut self, roster: Roster) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    pub fn researcher(mut self, researcher: Arc<dyn StackResearcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Skip writing the catalog. Control-plane commands (halt, approve) use
    /// this so they never touch agents or task types.
    pub fn bootstrap(mut self, enabled: bool) -> Self {
        self.bootstrap = enabled;
        self
    }

    pub async fn build(self) -> Result<Engine> {
        let config = self.config;
        let workflow = Arc::new(Workflow::from_config(&config.workflow)?);

        let store = match self.store {
            Some(store) => store,
            None => swarm_store::open_store(&config)?,
        };
        let graph = GraphClient::new(
            store,
            Namespace::new(&config.store.shared_namespace),
            Namespace::new(&config.store.default_namespace),
        );
        let event_bus = self.event_bus.unwrap_or_default();

        let catalog = Catalog::new(graph.clone());
        if self.bootstrap {
            catalog
                .bootstrap(&workflow, &config.agents, &config.rules)
                .await?;
        }

        let researcher = self.researcher.or_else(|| {
            config
                .researcher
                .clone()
                .map(|p| Arc::new(ProcessResearcher::new(p)) as Arc<dyn StackResearcher>)
        });
        let mut ledger = Ledger::new(graph.clone());
        if let Some(researcher) = researcher {
            ledger = ledger.with_researcher(researcher);
        }

        let decomposer = self.decomposer.or_else(|| {
            config
                .decomposer
                .clone()
                .map(|p| Arc::new(ProcessDecomposer::new(p)) as Arc<dyn Decomposer>)
        });

        let notifier = match self.notifier {
            Some(n) => n,
            None => default_notifier(&config),
        };
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ShellRunner::new()) as Arc<dyn CommandRunner>);

        let control = SystemControl::new(graph.clone(), event_bus.clone());
        let guard = Arc::new(CommandGuard::new(
            graph.clone(),
            &config.approval,
            runner,
            notifier,
            control.clone(),
            event_bus.clone(),
        ));

        let turns = TurnCoordinator::new(
            graph.clone(),
            workflow.seat_count(),
            Duration::from_millis(config.council.turn_poll_ms),
            Duration::from_millis(config.council.turn_jitter_ms),
        );

        let roster = self.roster.unwrap_or_else(|| Roster::from_config(&config));
        if roster.roles().is_empty() {
            warn!("No workers configured; every step will fail");
        }

        info!(
            store = graph.store().name(),
            entry = workflow.entry(),
            workers = roster.roles().len(),
            "Engine ready"
        );

        Ok(Engine {
            admission: AdmissionGate::new(graph.clone()),
            graph,
            workflow,
            catalog,
            ledger,
            turns,
            roster,
            guard,
            control,
            decomposer,
            event_bus,
            config,
        })
    }
}

fn default_notifier(config: &SwarmConfig) -> Arc<dyn Notifier> {
    if let Some(telegram) = &config.notify.telegram {
        match TelegramNotifier::new(telegram) {
            Ok(n) => return Arc::new(n),
            Err(e) => warn!(error = %e, "Telegram notifier unavailable, using log"),
        }
    }
    Arc::new(LogNotifier)
}

/// The orchestration engine: one instance serves many concurrent runs,
/// each confined to its own session namespace.
pub struct Engine {
    pub(crate) graph: GraphClient,
    pub(crate) workflow: Arc<Workflow>,
    pub(crate) catalog: Catalog,
    pub(crate) admission: AdmissionGate,
    pub(crate) ledger: Ledger,
    pub(crate) turns: TurnCoordinator,
    pub(crate) roster: Roster,
    pub(crate) guard: Arc<CommandGuard>,
    pub(crate) control: SystemControl,
    pub(crate) decomposer: Option<Arc<dyn Decomposer>>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) config: SwarmConfig,
}

/// One worker invocation, before it is recorded.
pub(crate) struct Dispatch<'a> {
    pub run_id: &'a str,
    pub namespace: &'a Namespace,
    pub agent: &'a str,
    pub role: Role,
    pub task_type: &'a str,
    pub task: &'a str,
    pub stack: &'a str,
    pub branch: Option<String>,
    pub history: &'a [HistoryEntry],
}

struct Step {
    agent: String,
    role: Role,
    output: WorkerOutput,
    turn: Option<u64>,
    negotiated: bool,
}

impl Engine {
    pub async fn from_config(config: SwarmConfig) -> Result<Self> {
        EngineBuilder::new(config).build().await
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn turns(&self) -> &TurnCoordinator {
        &self.turns
    }

    pub fn guard(&self) -> &Arc<CommandGuard> {
        &self.guard
    }

    pub fn control(&self) -> &SystemControl {
        &self.control
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Namespace run-scoped calls resolve to from the caller's position.
    pub fn ambient_namespace(&self) -> Namespace {
        self.graph.namespace(Scope::Run)
    }

    /// Run a task to completion inside `session` (or the ambient namespace).
    ///
    /// Retry exhaustion and unknown handlers end the run with
    /// `success = false` and an `aborted` reason; `Err` is reserved for
    /// failures that prevent the run from starting.
    pub async fn run(
        &self,
        description: &str,
        stack: &str,
        session: Option<Namespace>,
    ) -> Result<RunReport> {
        let namespace = session.unwrap_or_else(|| self.ambient_namespace());
        SessionScope::enter(namespace.clone(), self.run_in_scope(description, stack, namespace))
            .await
    }

    async fn run_in_scope(
        &self,
        description: &str,
        stack: &str,
        namespace: Namespace,
    ) -> Result<RunReport> {
        let (mode, task) = RunMode::detect(description);
        let stack = stack.trim().to_lowercase();
        let run_id = Uuid::new_v4().to_string();

        info!(run_id = %run_id, namespace = %namespace, mode = %mode, stack = %stack, "Run started");
        self.event_bus.publish(SwarmEvent::RunStarted {
            run_id: run_id.clone(),
            namespace: namespace.clone(),
            mode,
        });

        if let Err(e) = self.ledger.ensure_stack_knowledge(&stack).await {
            warn!(stack = %stack, error = %e, "Could not seed stack knowledge");
        }

        let report = match mode {
            RunMode::Council => self.run_council(&run_id, &task, &stack, &namespace).await?,
            RunMode::WarRoom => self.run_war_room(&run_id, &task, &stack, &namespace).await,
        };

        info!(
            run_id = %run_id,
            success = report.success,
            steps = report.history.len(),
            subtasks = report.subtasks.len(),
            "Run completed"
        );
        self.event_bus.publish(SwarmEvent::RunCompleted {
            run_id,
            success: report.success,
        });
        Ok(report)
    }

    async fn run_council(
        &self,
        run_id: &str,
        description: &str,
        stack: &str,
        namespace: &Namespace,
    ) -> Result<RunReport> {
        let max_retries = self.config.workflow.max_retries;
        let entry = self
            .workflow
            .get(self.workflow.entry())
            .ok_or_else(|| SwarmError::InvalidWorkflow("entry task type missing".into()))?;
        self.turns.start(entry.seat).await?;

        let mut task = description.to_string();
        let mut history: Vec<HistoryEntry> = Vec::new();
        let mut current = Some(entry.id.clone());
        let mut verdict: Option<WorkerOutput> = None;
        let mut failures: u32 = 0;
        let mut aborted: Option<String> = None;

        while let Some(task_id) = current.take() {
            let Some(task_type) = self.workflow.get(&task_id) else {
                aborted = Some(SwarmError::InvalidWorkflow(format!("unknown task type {}", task_id)).to_string());
                break;
            };

            let mut step = match self
                .step(run_id, namespace, task_type, &task, stack, &history, verdict.take())
                .await
            {
                Ok(step) => step,
                Err(e) => {
                    error!(run_id = %run_id, task_type = %task_id, error = %e, "Run aborted");
                    aborted = Some(e.to_string());
                    break;
                }
            };

            if step.output.is_success() {
                let next_seat = task_type
                    .next(Outcome::Success)
                    .and_then(|id| self.workflow.get(id))
                    .map(|t| t.seat);
                if let Err(e) = self.pass_turn(run_id, step.turn, next_seat).await {
                    warn!(run_id = %run_id, task_type = %task_id, error = %e, "Could not pass the turn on");
                    step.output = WorkerOutput::failure(format!("turn hand-off failed: {}", e));
                }
            }

            let outcome = step.output.status;
            let note = (!outcome.is_success()).then(|| step.output.failure_detail());
            if let Err(e) = self
                .ledger
                .record(&step.agent, &task_id, outcome, stack, note.as_deref())
                .await
            {
                warn!(run_id = %run_id, agent = %step.agent, error = %e, "Failed to record execution");
            }
            self.event_bus.publish(SwarmEvent::StepCompleted {
                run_id: run_id.to_string(),
                task_type: task_id.clone(),
                agent: step.agent.clone(),
                outcome,
            });

            let next = task_type.next(outcome).map(str::to_string);

            if outcome.is_success() {
                if let (Some(review), Some(next_id)) = (&step.output.peer_review, &next) {
                    let reviewed_next = self
                        .workflow
                        .get(next_id)
                        .is_some_and(|t| t.handler == Role::Reviewer);
                    if self.config.workflow.negotiation_skip && reviewed_next {
                        info!(run_id = %run_id, approved = review.approved, "Using negotiated review verdict");
                        verdict = Some(WorkerOutput::from(review));
                    }
                }
            } else {
                failures += 1;
                if failures > max_retries {
                    let err = SwarmError::MaxRetriesExceeded {
                        attempts: failures,
                        limit: max_retries,
                    };
                    error!(run_id = %run_id, error = %err, "Run aborted");
                    aborted = Some(err.to_string());
                    history.push(entry_from(&task_id, step));
                    break;
                }
                if let Some(detail) = &note {
                    task.push_str(&format!(
                        "\n\nFEEDBACK FROM PREVIOUS ATTEMPT ({}):\n{}",
                        task_id, detail
                    ));
                }
                if let Some(next_task) = next.as_deref().and_then(|id| self.workflow.get(id)) {
                    if let Err(e) = self.turns.hand_off(next_task.seat).await {
                        error!(run_id = %run_id, error = %e, "Turn hand-off failed, run aborted");
                        aborted = Some(e.to_string());
                        history.push(entry_from(&task_id, step));
                        break;
                    }
                    warn!(
                        run_id = %run_id,
                        task_type = %task_id,
                        attempt = failures,
                        next = %next_task.id,
                        "Step failed, retrying"
                    );
                    self.event_bus.publish(SwarmEvent::RetryScheduled {
                        run_id: run_id.to_string(),
                        attempt: failures,
                        next_task: next_task.id.clone(),
                    });
                }
            }

            history.push(entry_from(&task_id, step));
            current = next;
        }

        let success = aborted.is_none()
            && history
                .last()
                .is_some_and(|h| h.outcome == Outcome::Success);
        Ok(RunReport {
            run_id: run_id.to_string(),
            namespace: namespace.clone(),
            mode: RunMode::Council,
            success,
            history,
            subtasks: Vec::new(),
            aborted,
        })
    }

    /// One council step. `Err` aborts the run; everything else, including
    /// store trouble, comes back as a failed output.
    async fn step(
        &self,
        run_id: &str,
        namespace: &Namespace,
        task_type: &TaskType,
        task: &str,
        stack: &str,
        history: &[HistoryEntry],
        verdict: Option<WorkerOutput>,
    ) -> Result<Step> {
        let fallback = |output: WorkerOutput| Step {
            agent: task_type.handler.to_string(),
            role: task_type.handler,
            output,
            turn: None,
            negotiated: false,
        };

        let role = match self.catalog.handler_for(&task_type.id).await {
            Ok(Some(role)) => role,
            Ok(None) => return Err(SwarmError::UnknownHandler(task_type.id.clone())),
            Err(e) => return Ok(fallback(WorkerOutput::failure(e.to_string()))),
        };

        let agent = if role == Role::Coder {
            self.catalog.specialized_agent(stack).await
        } else {
            self.catalog
                .agent_for_role(role)
                .await
                .map(|a| a.unwrap_or_else(|| role.to_string()))
        };
        let agent = match agent {
            Ok(agent) => agent,
            Err(e) => return Ok(fallback(WorkerOutput::failure(e.to_string()))),
        };

        let turn = match self.turns.acquire(task_type.seat).await {
            Ok(turn) => turn,
            Err(e) => {
                return Ok(Step {
                    agent,
                    role,
                    output: WorkerOutput::failure(e.to_string()),
                    turn: None,
                    negotiated: false,
                })
            }
        };

        self.event_bus.publish(SwarmEvent::StepStarted {
            run_id: run_id.to_string(),
            task_type: task_type.id.clone(),
            agent: agent.clone(),
        });
        info!(run_id = %run_id, task_type = %task_type.id, agent = %agent, turn, "Step started");

        let negotiated = verdict.is_some();
        let output = match verdict {
            Some(verdict) => {
                if self.admission.authorize(&agent, &task_type.id).await {
                    verdict
                } else {
                    security_violation(&agent, &task_type.id)
                }
            }
            None => {
                self.dispatch(Dispatch {
                    run_id,
                    namespace,
                    agent: &agent,
                    role,
                    task_type: &task_type.id,
                    task,
                    stack,
                    branch: None,
                    history,
                })
                .await
            }
        };

        Ok(Step {
            agent,
            role,
            output,
            turn: Some(turn),
            negotiated,
        })
    }

    /// After a successful step: advance past the consumed turn, then make
    /// sure the next task's seat holds it. A failed advance is recovered by
    /// the hand-off; only a failed hand-off is an error.
    async fn pass_turn(
        &self,
        run_id: &str,
        consumed: Option<u64>,
        next_seat: Option<usize>,
    ) -> Result<()> {
        if let Some(turn) = consumed {
            match self.turns.advance(turn).await {
                Ok(turn) => self.event_bus.publish(SwarmEvent::TurnAdvanced {
                    run_id: run_id.to_string(),
                    turn,
                }),
                Err(e) => warn!(run_id = %run_id, error = %e, "Failed to advance turn"),
            }
        }
        if let Some(seat) = next_seat {
            let turn = self.turns.hand_off(seat).await?;
            debug!(run_id = %run_id, turn, seat, "Turn ready for next step");
        }
        Ok(())
    }

    /// Admission, prompt enrichment and the worker call. Never fails: every
    /// problem becomes a failed output.
    pub(crate) async fn dispatch(&self, d: Dispatch<'_>) -> WorkerOutput {
        if !self.admission.authorize(d.agent, d.task_type).await {
            return security_violation(d.agent, d.task_type);
        }

        let lessons = self.ledger.lessons(d.agent, d.stack).await.unwrap_or_else(|e| {
            warn!(agent = %d.agent, error = %e, "Could not load lessons");
            Vec::new()
        });
        let rules = self
            .ledger
            .golden_rules(d.role, d.stack)
            .await
            .unwrap_or_else(|e| {
                warn!(role = %d.role, error = %e, "Could not load hard constraints");
                Vec::new()
            });
        let prompt = compose_prompt(d.task, d.stack, &lessons, &rules);

        let ctx = WorkerContext {
            run_id: d.run_id.to_string(),
            namespace: d.namespace.clone(),
            agent: d.agent.to_string(),
            role: d.role,
            task_type: d.task_type.to_string(),
            stack: d.stack.to_string(),
            branch: d.branch,
            history: d.history.to_vec(),
            commands: Some(self.guard.clone() as Arc<dyn CommandGate>),
        };

        match self.roster.execute(d.role, prompt, ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    agent = %d.agent,
                    task_type = %d.task_type,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Worker failed"
                );
                WorkerOutput::failure(e.to_string())
            }
        }
    }
}

fn security_violation(agent: &str, task_type: &str) -> WorkerOutput {
    let err = SwarmError::SecurityViolation {
        agent: agent.to_string(),
        task_type: task_type.to_string(),
    };
    warn!(agent = %agent, task_type = %task_type, "Admission denied");
    WorkerOutput::failure(err.to_string())
}

fn entry_from(task_type: &str, step: Step) -> HistoryEntry {
    HistoryEntry {
        task_type: task_type.to_string(),
        agent: step.agent,
        role: step.role,
        outcome: step.output.status,
        output: step.output,
        negotiated: step.negotiated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::config::{AgentConfig, TaskTypeConfig};
    use swarm_core::types::PeerReview;
    use swarm_core::vocab;
    use swarm_store::MemoryGraphStore;
    use swarm_test_utils::{FakeRunner, FlakyStore, RecordingNotifier, ScriptedWorker};

    struct Crew {
        coder: Arc<ScriptedWorker>,
        reviewer: Arc<ScriptedWorker>,
        deployer: Arc<ScriptedWorker>,
    }

    impl Crew {
        fn new() -> Self {
            Self {
                coder: Arc::new(ScriptedWorker::new("coder")),
                reviewer: Arc::new(ScriptedWorker::new("reviewer")),
                deployer: Arc::new(ScriptedWorker::new("deployer")),
            }
        }

        fn roster(&self) -> Roster {
            Roster::new()
                .with(Role::Coder, self.coder.clone())
                .with(Role::Reviewer, self.reviewer.clone())
                .with(Role::Deployer, self.deployer.clone())
        }
    }

    fn test_config() -> SwarmConfig {
        let mut config = SwarmConfig::default();
        config.council.turn_poll_ms = 10;
        config.council.turn_jitter_ms = 0;
        config
    }

    async fn engine(config: SwarmConfig, crew: &Crew) -> Engine {
        EngineBuilder::new(config)
            .store(Arc::new(MemoryGraphStore::new()))
            .roster(crew.roster())
            .notifier(Arc::new(RecordingNotifier::new()))
            .runner(Arc::new(FakeRunner::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn council_runs_pipeline_in_seat_order() {
        let crew = Crew::new();
        let engine = engine(test_config(), &crew).await;
        let ns = Namespace::new("happy");

        let report = engine.run("Add login", "python", Some(ns.clone())).await.unwrap();

        assert!(report.success);
        assert!(report.aborted.is_none());
        let steps: Vec<&str> = report.history.iter().map(|h| h.task_type.as_str()).collect();
        assert_eq!(
            steps,
            vec!["FeatureImplementationTask", "CodeReviewTask", "DeploymentTask"]
        );
        assert_eq!(report.history[0].agent, "PythonCoder");
        assert_eq!(report.history[1].agent, "Reviewer");

        // Entry seat 2, one advance per successful step.
        let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
        assert_eq!(turn, Some(5));

        let task = &crew.coder.tasks()[0];
        assert!(task.contains("CONTEXT: Stack=python"));
        assert!(task.ends_with("Add login"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let crew = Crew::new();
        for _ in 0..4 {
            crew.coder.push(WorkerOutput::failure("X"));
        }
        let engine = engine(test_config(), &crew).await;
        let ns = Namespace::new("retry");

        let report = engine.run("Build", "python", Some(ns.clone())).await.unwrap();

        assert!(!report.success);
        assert!(report.aborted.as_deref().unwrap().contains("Max retries"));
        assert_eq!(report.history.len(), 4);
        assert_eq!(crew.coder.calls(), 4);
        assert_eq!(crew.reviewer.calls(), 0);

        let records = SessionScope::enter(ns, engine.ledger().records_for("PythonCoder"))
            .await
            .unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.outcome == Outcome::Failure));

        let last = crew.coder.tasks().pop().unwrap();
        assert!(last.contains("FEEDBACK FROM PREVIOUS ATTEMPT (FeatureImplementationTask):\nX"));
        assert!(last.contains("LESSONS LEARNED:\n- X"));
    }

    #[tokio::test]
    async fn failure_does_not_advance_turn() {
        let crew = Crew::new();
        crew.coder.push(WorkerOutput::failure("flaky build"));
        let engine = engine(test_config(), &crew).await;
        let ns = Namespace::new("one-failure");

        let report = engine.run("Build", "python", Some(ns.clone())).await.unwrap();
        assert!(report.success);
        assert_eq!(report.history.len(), 4);
        assert_eq!(report.history[0].outcome, Outcome::Failure);

        // Retry reused seat 2 without moving the counter.
        let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
        assert_eq!(turn, Some(5));
    }

    #[tokio::test]
    async fn approved_negotiation_skips_reviewer() {
        let crew = Crew::new();
        crew.coder.push(WorkerOutput::success("done").with_peer_review(PeerReview {
            approved: true,
            issues: vec![],
        }));
        let engine = engine(test_config(), &crew).await;
        let ns = Namespace::new("negotiated");

        let report = engine.run("Build", "python", Some(ns.clone())).await.unwrap();

        assert!(report.success);
        assert_eq!(crew.reviewer.calls(), 0);
        assert_eq!(crew.deployer.calls(), 1);
        assert!(report.history[1].negotiated);
        assert_eq!(report.history[1].outcome, Outcome::Success);

        // The skipped review still consumed its turn and left a record.
        let turn = SessionScope::enter(ns.clone(), engine.turns().current())
            .await
            .unwrap();
        assert_eq!(turn, Some(5));
        let records = SessionScope::enter(ns, engine.ledger().records_for("Reviewer"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn rejected_negotiation_returns_to_coder() {
        let crew = Crew::new();
        crew.coder.push(WorkerOutput::success("v1").with_peer_review(PeerReview {
            approved: false,
            issues: vec!["no tests".into()],
        }));
        let engine = engine(test_config(), &crew).await;
        let ns = Namespace::new("renegotiate");

        let report = engine.run("Build", "python", Some(ns.clone())).await.unwrap();

        assert!(report.success);
        let steps: Vec<(&str, Outcome)> = report
            .history
            .iter()
            .map(|h| (h.task_type.as_str(), h.outcome))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("FeatureImplementationTask", Outcome::Success),
                ("CodeReviewTask", Outcome::Failure),
                ("FeatureImplementationTask", Outcome::Success),
                ("CodeReviewTask", Outcome::Success),
                ("DeploymentTask", Outcome::Success),
            ]
        );
        assert_eq!(crew.reviewer.calls(), 1);
        assert!(crew.coder.tasks()[1].contains("no tests"));

        // 2 -> 3, hand-off to seat 2 at 7, then 8, 9, 10.
        let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
        assert_eq!(turn, Some(10));
    }

    #[tokio::test]
    async fn admission_denial_is_a_retryable_failure() {
        let crew = Crew::new();
        let mut config = test_config();
        config.workflow.max_retries = 1;
        config.agents.push(AgentConfig {
            name: "Intern".into(),
            role: Role::Coder,
            specialties: vec!["python".into()],
            permissions: Some(vec!["ReadDocs".into()]),
        });
        let engine = engine(config, &crew).await;

        let report = engine.run("Build", "python", None).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.history.len(), 2);
        assert!(report
            .history
            .iter()
            .all(|h| h.agent == "Intern" && h.output.failure_detail().contains("Security violation")));
        assert_eq!(crew.coder.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_handler_aborts() {
        let crew = Crew::new();
        let engine = EngineBuilder::new(test_config())
            .store(Arc::new(MemoryGraphStore::new()))
            .roster(crew.roster())
            .bootstrap(false)
            .build()
            .await
            .unwrap();

        let report = engine.run("Build", "python", None).await.unwrap();
        assert!(!report.success);
        assert!(report.history.is_empty());
        assert!(report
            .aborted
            .as_deref()
            .unwrap()
            .contains("FeatureImplementationTask"));
        assert_eq!(crew.coder.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_runs_stay_in_their_namespaces() {
        let crew = Crew::new();
        let engine = engine(test_config(), &crew).await;
        let before = engine.ambient_namespace();

        let (a, b) = tokio::join!(
            engine.run("Build A", "python", Some(Namespace::new("session-a"))),
            engine.run("Build B", "python", Some(Namespace::new("session-b"))),
        );
        assert!(a.unwrap().success);
        assert!(b.unwrap().success);
        assert_eq!(engine.ambient_namespace(), before);

        for ns in ["session-a", "session-b"] {
            let ns = Namespace::new(ns);
            let records = SessionScope::enter(ns.clone(), engine.ledger().records_for("PythonCoder"))
                .await
                .unwrap();
            assert_eq!(records.len(), 1);
            let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
            assert_eq!(turn, Some(5));
        }
        // Nothing leaked into the fallback namespace.
        assert!(engine.ledger().records_for("PythonCoder").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_steps_see_earlier_outputs() {
        let crew = Crew::new();
        crew.coder.push(WorkerOutput::success("wrote src/app.py"));
        let engine = engine(test_config(), &crew).await;

        let report = engine.run("Build", "python", None).await.unwrap();
        assert!(report.success);

        assert!(crew.coder.contexts()[0].history.is_empty());

        let review_ctx = &crew.reviewer.contexts()[0];
        assert_eq!(review_ctx.history.len(), 1);
        let coded = &review_ctx.history[0];
        assert_eq!(coded.task_type, "FeatureImplementationTask");
        assert_eq!(coded.agent, "PythonCoder");
        assert_eq!(coded.output.summary.as_deref(), Some("wrote src/app.py"));

        let deploy_ctx = &crew.deployer.contexts()[0];
        let seen: Vec<&str> = deploy_ctx.history.iter().map(|h| h.task_type.as_str()).collect();
        assert_eq!(seen, vec!["FeatureImplementationTask", "CodeReviewTask"]);
    }

    async fn flaky_engine(config: SwarmConfig, crew: &Crew) -> (Engine, Arc<FlakyStore<MemoryGraphStore>>) {
        let store = Arc::new(FlakyStore::new(MemoryGraphStore::new()));
        let engine = EngineBuilder::new(config)
            .store(store.clone())
            .roster(crew.roster())
            .notifier(Arc::new(RecordingNotifier::new()))
            .runner(Arc::new(FakeRunner::new()))
            .build()
            .await
            .unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn failed_advance_is_recovered_by_hand_off() {
        let crew = Crew::new();
        let (engine, store) = flaky_engine(test_config(), &crew).await;
        let ns = Namespace::new("lost-advance");
        SessionScope::enter(ns.clone(), engine.turns().start(2)).await.unwrap();

        // The coder's advance is the first turn write of the run.
        store.fail_writes_of(vocab::CURRENT_TURN, 1);
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run("Build", "python", Some(ns.clone())),
        )
        .await
        .expect("run finished")
        .unwrap();

        assert!(report.success);
        assert!(report.history.iter().all(|h| h.outcome == Outcome::Success));
        assert_eq!(report.history.len(), 3);
        let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
        assert_eq!(turn, Some(5));
    }

    #[tokio::test]
    async fn stuck_turn_counter_fails_steps_and_terminates() {
        let crew = Crew::new();
        let mut config = test_config();
        config.workflow.max_retries = 1;
        let (engine, store) = flaky_engine(config, &crew).await;
        let ns = Namespace::new("stuck-turn");
        SessionScope::enter(ns.clone(), engine.turns().start(2)).await.unwrap();

        store.fail_writes_of(vocab::CURRENT_TURN, usize::MAX);
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run("Build", "python", Some(ns)),
        )
        .await
        .expect("run finished")
        .unwrap();

        assert!(!report.success);
        assert!(report.aborted.as_deref().unwrap().contains("Max retries"));
        assert_eq!(report.history.len(), 2);
        assert!(report
            .history
            .iter()
            .all(|h| h.outcome == Outcome::Failure
                && h.output.failure_detail().contains("turn hand-off failed")));
        assert_eq!(crew.coder.calls(), 2);
        assert_eq!(crew.reviewer.calls(), 0);
    }

    #[tokio::test]
    async fn success_transition_may_skip_seats() {
        let crew = Crew::new();
        let mut config = test_config();
        let task = |id: &str, handler, seat, on_success: Option<&str>| TaskTypeConfig {
            id: id.into(),
            handler,
            seat: Some(seat),
            permission: None,
            on_success: on_success.map(str::to_string),
            on_failure: Some("Build".into()),
        };
        config.workflow.entry = "Build".into();
        config.workflow.task_types = vec![
            task("Build", Role::Coder, 0, Some("Ship")),
            task("Review", Role::Reviewer, 1, Some("Ship")),
            task("Ship", Role::Deployer, 2, None),
        ];
        let engine = engine(config, &crew).await;
        let ns = Namespace::new("skip-seat");

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run("Build", "python", Some(ns.clone())),
        )
        .await
        .expect("run finished")
        .unwrap();

        assert!(report.success);
        let steps: Vec<&str> = report.history.iter().map(|h| h.task_type.as_str()).collect();
        assert_eq!(steps, vec!["Build", "Ship"]);
        assert_eq!(crew.reviewer.calls(), 0);

        // 0 -> 1 on success, handed to seat 2, then advanced to 3.
        let turn = SessionScope::enter(ns, engine.turns().current()).await.unwrap();
        assert_eq!(turn, Some(3));
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let crew = Crew::new();
        let engine = engine(test_config(), &crew).await;
        let mut rx = engine.event_bus().subscribe();

        engine.run("Build", "python", None).await.unwrap();

        let mut completed = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SwarmEvent::StepCompleted { .. } => completed += 1,
                SwarmEvent::RunCompleted { success, .. } => finished = success,
                _ => {}
            }
        }
        assert_eq!(completed, 3);
        assert!(finished);
    }
}
