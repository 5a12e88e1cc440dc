//! Fakes for the engine's trait seams: workers, stores, decomposers,
//! researchers, notifiers and command runners.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use swarm_core::error::{Result, SwarmError};
use swarm_core::graph::{ShadowQuery, Triple, TriplePattern};
use swarm_core::security::CommandOutput;
use swarm_core::traits::{
    CommandGate, CommandRunner, Decomposer, GraphStore, Notifier, StackResearcher, Worker,
};
use swarm_core::types::{Namespace, Notification, Outcome, Subtask, WorkerContext, WorkerOutput};

/// Worker that replays queued results and records what it was asked.
///
/// Once the queue is drained every call succeeds with a generic summary.
pub struct ScriptedWorker {
    name: String,
    script: Mutex<VecDeque<Result<WorkerOutput>>>,
    tasks: Mutex<Vec<String>>,
    contexts: Mutex<Vec<WorkerContext>>,
    delay: Option<Duration>,
    command: Option<(String, String)>,
    fail_on: Option<String>,
}

impl ScriptedWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            delay: None,
            command: None,
            fail_on: None,
        }
    }

    /// Fail any task whose text contains `needle`, ahead of the script.
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run this command through the context's gate on every call. A refused
    /// command turns the call into a failure.
    pub fn with_command(mut self, command: &str, reason: &str) -> Self {
        self.command = Some((command.to_string(), reason.to_string()));
        self
    }

    pub fn push(&self, output: WorkerOutput) -> &Self {
        self.script.lock().unwrap().push_back(Ok(output));
        self
    }

    pub fn push_error(&self, error: SwarmError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<WorkerContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: String, ctx: WorkerContext) -> BoxFuture<'_, Result<WorkerOutput>> {
        Box::pin(async move {
            let matched = self.fail_on.as_deref().is_some_and(|n| task.contains(n));
            self.tasks.lock().unwrap().push(task);
            self.contexts.lock().unwrap().push(ctx.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let (Some((command, reason)), Some(gate)) = (&self.command, &ctx.commands) {
                if let Err(e) = gate
                    .run_command(command.clone(), reason.clone(), ctx.agent.clone())
                    .await
                {
                    return Ok(WorkerOutput::failure(e.to_string()));
                }
            }
            if matched {
                return Ok(WorkerOutput::failure(format!("{} failed", self.name)));
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(WorkerOutput::success(format!("{} done", self.name))))
        })
    }
}

/// Store wrapper that fails the next N operations with a store error, or
/// only the next N writes touching one predicate.
pub struct FlakyStore<S> {
    inner: S,
    failures: AtomicUsize,
    write_failures: Mutex<Option<(String, usize)>>,
}

impl<S: GraphStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
            write_failures: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` ingests that carry a triple with `predicate`.
    pub fn fail_writes_of(&self, predicate: &str, n: usize) {
        *self.write_failures.lock().unwrap() = Some((predicate.to_string(), n));
    }

    fn trip_write(&self, triples: &[Triple]) -> Result<()> {
        let mut guard = self.write_failures.lock().unwrap();
        if let Some((predicate, remaining)) = guard.as_mut() {
            if *remaining > 0 && triples.iter().any(|t| t.predicate == *predicate) {
                *remaining -= 1;
                return Err(SwarmError::Store(format!("injected failure writing {}", predicate)));
            }
        }
        Ok(())
    }

    fn trip(&self) -> Result<()> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(SwarmError::Store("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl<S: GraphStore> GraphStore for FlakyStore<S> {
    fn name(&self) -> &str {
        "flaky"
    }

    fn ingest(&self, namespace: &Namespace, triples: Vec<Triple>) -> BoxFuture<'_, Result<()>> {
        match self.trip().and_then(|()| self.trip_write(&triples)) {
            Ok(()) => self.inner.ingest(namespace, triples),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn query(
        &self,
        namespace: &Namespace,
        pattern: TriplePattern,
    ) -> BoxFuture<'_, Result<Vec<Triple>>> {
        match self.trip() {
            Ok(()) => self.inner.query(namespace, pattern),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn ask_active(&self, namespace: &Namespace, query: ShadowQuery) -> BoxFuture<'_, Result<bool>> {
        match self.trip() {
            Ok(()) => self.inner.ask_active(namespace, query),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

/// Researcher returning a fixed list of principles.
pub struct StaticResearcher {
    principles: Vec<String>,
    calls: AtomicUsize,
}

impl StaticResearcher {
    pub fn new(principles: Vec<&str>) -> Self {
        Self {
            principles: principles.into_iter().map(str::to_string).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StackResearcher for StaticResearcher {
    fn research(&self, _stack: String) -> BoxFuture<'_, Result<Vec<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let principles = self.principles.clone();
        Box::pin(async move { Ok(principles) })
    }
}

/// Decomposer returning fixed subtasks, or failing.
pub struct ScriptedDecomposer {
    subtasks: Option<Vec<Subtask>>,
    calls: AtomicUsize,
}

impl ScriptedDecomposer {
    pub fn new(subtasks: Vec<(&str, &str)>) -> Self {
        Self {
            subtasks: Some(
                subtasks
                    .into_iter()
                    .map(|(stack, description)| Subtask {
                        stack: stack.to_string(),
                        description: description.to_string(),
                    })
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            subtasks: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decomposer for ScriptedDecomposer {
    fn decompose(
        &self,
        _description: String,
        _supported_stacks: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<Subtask>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let subtasks = self.subtasks.clone();
        Box::pin(async move {
            subtasks.ok_or_else(|| SwarmError::Decomposition("scripted failure".into()))
        })
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<()>> {
        self.sent.lock().unwrap().push(notification);
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(SwarmError::Notify {
                    channel: "recording".into(),
                    message: "scripted failure".into(),
                })
            } else {
                Ok(())
            }
        })
    }
}

fn ok_output(command: &str) -> CommandOutput {
    CommandOutput {
        status: Outcome::Success,
        exit_code: Some(0),
        stdout: format!("ran: {}", command),
        stderr: String::new(),
    }
}

/// Command runner that records commands instead of running them.
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: String, _timeout: Duration) -> BoxFuture<'_, Result<CommandOutput>> {
        self.commands.lock().unwrap().push(command.clone());
        Box::pin(async move { Ok(ok_output(&command)) })
    }
}

/// Command gate that either runs everything or refuses everything.
pub struct FakeGate {
    allow: bool,
    commands: Mutex<Vec<String>>,
}

impl FakeGate {
    pub fn allowing() -> Self {
        Self {
            allow: true,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self {
            allow: false,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandGate for FakeGate {
    fn run_command(
        &self,
        command: String,
        _reason: String,
        _requested_by: String,
    ) -> BoxFuture<'_, Result<CommandOutput>> {
        self.commands.lock().unwrap().push(command.clone());
        let allow = self.allow;
        Box::pin(async move {
            if allow {
                Ok(ok_output(&command))
            } else {
                Err(SwarmError::ApprovalRejected {
                    id: "fake".into(),
                })
            }
        })
    }
}
