use std::sync::Arc;

use swarm_core::config::{StoreBackend, SwarmConfig};
use swarm_core::security::{ApprovalStatus, CommandOutcome};
use swarm_core::types::{Namespace, Outcome, Role};
use swarm_engine::{Engine, EngineBuilder, Roster};
use swarm_store::SessionScope;
use swarm_test_utils::{FakeRunner, RecordingNotifier, ScriptedWorker};

fn sqlite_config(dir: &tempfile::TempDir) -> SwarmConfig {
    let mut config = SwarmConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.path = dir.path().join("graph.db").display().to_string();
    config.council.turn_poll_ms = 10;
    config.council.turn_jitter_ms = 0;
    config
}

async fn engine(config: SwarmConfig) -> Engine {
    EngineBuilder::new(config)
        .roster(
            Roster::new()
                .with(Role::Coder, Arc::new(ScriptedWorker::new("coder")))
                .with(Role::Reviewer, Arc::new(ScriptedWorker::new("reviewer")))
                .with(Role::Deployer, Arc::new(ScriptedWorker::new("deployer"))),
        )
        .runner(Arc::new(FakeRunner::new()))
        .notifier(Arc::new(RecordingNotifier::new()))
        .build()
        .await
        .expect("build engine")
}

#[tokio::test]
async fn run_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ns = Namespace::new("persisted");

    let first = engine(sqlite_config(&dir)).await;
    let report = first.run("Add export", "python", Some(ns.clone())).await.expect("run");
    assert!(report.success);
    drop(first);

    let second = engine(sqlite_config(&dir)).await;
    let records = SessionScope::enter(ns.clone(), second.ledger().records_for("PythonCoder"))
        .await
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Success);
    assert_eq!(records[0].stack, "python");

    let turn = SessionScope::enter(ns, second.turns().current())
        .await
        .expect("turn");
    assert_eq!(turn, Some(5));

    // Another session starts from a clean slate.
    let other = SessionScope::enter(Namespace::new("fresh"), second.turns().current())
        .await
        .expect("turn");
    assert_eq!(other, None);
}

#[tokio::test]
async fn approvals_and_halt_are_shared_between_processes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let requester = engine(sqlite_config(&dir)).await;
    let operator = engine(sqlite_config(&dir)).await;

    let outcome = requester
        .guard()
        .execute("docker compose up -d", "start services", "DevOpsBot")
        .await
        .expect("execute");
    let CommandOutcome::PendingApproval { request_id } = outcome else {
        panic!("expected a pending approval");
    };

    let pending = operator.guard().pending().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].requested_by, "DevOpsBot");

    operator.guard().approve(&request_id, "alice").await.expect("approve");
    assert_eq!(
        requester.guard().check_status(&request_id).await.expect("status"),
        ApprovalStatus::Approved
    );

    operator.control().halt("alice").await.expect("halt");
    assert!(requester.control().is_halted().await.expect("halted"));
}
