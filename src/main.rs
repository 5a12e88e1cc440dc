use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use swarm_core::config::SwarmConfig;
use swarm_core::error::SwarmError;
use swarm_core::event::EventBus;
use swarm_core::security::CommandOutcome;
use swarm_core::types::{Namespace, Outcome, RunReport, SwarmEvent};
use swarm_engine::{Engine, EngineBuilder};

/// Exit code when an approval request was rejected.
const EXIT_REJECTED: u8 = 3;
/// Exit code when no decision arrived in time.
const EXIT_TIMEOUT: u8 = 4;
/// Exit code when the kill switch denied the command.
const EXIT_HALTED: u8 = 5;

#[derive(Parser)]
#[command(name = "swarm", version, about = "Task orchestration engine for agent swarms")]
struct Cli {
    /// Path to config file (defaults to ~/.swarm/config.toml when present)
    #[arg(short, long, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// Session namespace for run-scoped state
    #[arg(short, long, env = "SWARM_SESSION")]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task through the workflow and exit with its status
    Run {
        /// Technology stack of the task
        #[arg(long, default_value = "python")]
        stack: String,
        /// Run in a fresh throwaway namespace (overrides --session)
        #[arg(long)]
        ephemeral: bool,
        /// Stream engine events to stderr while running
        #[arg(long)]
        follow: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Task description; include [MODE:WAR_ROOM] for parallel mode
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,
    },
    /// Engage the kill switch
    Halt {
        #[arg(long, default_value_t = default_actor())]
        actor: String,
    },
    /// Release the kill switch
    Resume {
        #[arg(long, default_value_t = default_actor())]
        actor: String,
    },
    /// Show kill switch state and pending approvals
    Status,
    /// Approve a pending command
    Approve {
        id: String,
        #[arg(long, default_value_t = default_actor())]
        by: String,
    },
    /// Reject a pending command
    Deny {
        id: String,
        #[arg(long, default_value_t = default_actor())]
        by: String,
    },
    /// List pending approval requests
    Pending,
    /// Run a shell command through the approval guardrail
    Exec {
        #[arg(long, default_value = "manual execution")]
        reason: String,
        #[arg(long, default_value_t = default_actor())]
        by: String,
        /// File the request and exit instead of waiting for a decision
        #[arg(long)]
        no_wait: bool,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn default_actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swarm=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "swarm", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &cli.config {
        Some(path) => SwarmConfig::load(path)?,
        None => SwarmConfig::load_or_default(&SwarmConfig::default_path())?,
    };
    let session = cli.session.map(Namespace::new);

    match cli.command {
        Commands::Run {
            stack,
            ephemeral,
            follow,
            json,
            task,
        } => {
            let engine = Engine::from_config(config).await?;
            let session = if ephemeral { Some(Namespace::ephemeral()) } else { session };
            let follower = follow.then(|| spawn_follower(engine.event_bus()));

            let report = engine.run(&task.join(" "), &stack, session).await?;
            if let Some(handle) = follower {
                handle.abort();
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Halt { actor } => {
            control_engine(config).await?.control().halt(&actor).await?;
            println!("System HALTED by {}", actor);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resume { actor } => {
            control_engine(config).await?.control().resume(&actor).await?;
            println!("System OPERATIONAL (resumed by {})", actor);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let engine = control_engine(config).await?;
            let status = engine.control().status().await?;
            let pending = engine.guard().pending().await?;
            println!("System: {}", status);
            println!("Pending approvals: {}", pending.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Approve { id, by } => {
            control_engine(config).await?.guard().approve(&id, &by).await?;
            println!("Approved {}", id);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Deny { id, by } => {
            control_engine(config).await?.guard().reject(&id, &by).await?;
            println!("Rejected {}", id);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Pending => {
            let pending = control_engine(config).await?.guard().pending().await?;
            if pending.is_empty() {
                println!("No pending approvals.");
            }
            for req in pending {
                println!(
                    "{}  {}  by {}  ({})\n    {}",
                    req.id,
                    req.requested_at.format("%Y-%m-%d %H:%M:%S"),
                    req.requested_by,
                    req.reason,
                    req.command
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec {
            reason,
            by,
            no_wait,
            command,
        } => {
            let engine = control_engine(config).await?;
            exec(&engine, &command.join(" "), &reason, &by, no_wait).await
        }
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Engine for control-plane commands; leaves the catalog untouched.
async fn control_engine(config: SwarmConfig) -> anyhow::Result<Engine> {
    Ok(EngineBuilder::new(config).bootstrap(false).build().await?)
}

async fn exec(
    engine: &Engine,
    command: &str,
    reason: &str,
    by: &str,
    no_wait: bool,
) -> anyhow::Result<ExitCode> {
    let guard = engine.guard();
    let result = match guard.execute(command, reason, by).await {
        Ok(CommandOutcome::Executed(output)) => Ok(output),
        Ok(CommandOutcome::PendingApproval { request_id }) => {
            eprintln!("Approval required. Request ID: {}", request_id);
            if no_wait {
                println!("{}", request_id);
                return Ok(ExitCode::SUCCESS);
            }
            eprintln!("Waiting for `swarm approve {}` ...", request_id);
            guard.await_decision(&request_id).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            Ok(match output.status {
                Outcome::Success => ExitCode::SUCCESS,
                Outcome::Failure => {
                    ExitCode::from(output.exit_code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1))
                }
            })
        }
        Err(e) => {
            error!(error = %e, "Command not executed");
            eprintln!("{}", e);
            Ok(ExitCode::from(match e {
                SwarmError::ApprovalRejected { .. } => EXIT_REJECTED,
                SwarmError::ApprovalTimeout { .. } => EXIT_TIMEOUT,
                SwarmError::SystemHalted => EXIT_HALTED,
                _ => 1,
            }))
        }
    }
}

fn spawn_follower(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                SwarmEvent::RunStarted { namespace, mode, .. } => {
                    eprintln!("[run] {} mode in namespace {}", mode, namespace)
                }
                SwarmEvent::StepStarted { task_type, agent, .. } => {
                    eprintln!("[step] {} -> {}", task_type, agent)
                }
                SwarmEvent::StepCompleted {
                    task_type, outcome, ..
                } => eprintln!("[step] {} {}", task_type, outcome),
                SwarmEvent::TurnAdvanced { turn, .. } => eprintln!("[turn] {}", turn),
                SwarmEvent::RetryScheduled {
                    attempt, next_task, ..
                } => eprintln!("[retry] attempt {} -> {}", attempt, next_task),
                SwarmEvent::SubtaskCompleted {
                    stack,
                    branch,
                    outcome,
                    ..
                } => eprintln!("[subtask] {} on {}: {}", stack, branch, outcome),
                SwarmEvent::ApprovalRequested {
                    request_id,
                    command,
                } => eprintln!(
                    "[APPROVAL] \"{}\" needs sign-off: swarm approve {}",
                    command, request_id
                ),
                SwarmEvent::ApprovalResolved { request_id, status } => {
                    eprintln!("[approval] {} {}", request_id, status)
                }
                SwarmEvent::SystemStatusChanged { status, actor } => {
                    eprintln!("[system] {} by {}", status, actor)
                }
                SwarmEvent::RunCompleted { .. } => break,
            }
        }
    })
}

fn print_report(report: &RunReport) {
    println!(
        "Run {} ({} mode, namespace {})",
        report.run_id, report.mode, report.namespace
    );
    for (i, step) in report.history.iter().enumerate() {
        let marker = if step.negotiated { " (negotiated)" } else { "" };
        println!(
            "  {:>2}. {:<28} {:<16} {}{}",
            i + 1,
            step.task_type,
            step.agent,
            step.outcome,
            marker
        );
        if step.outcome == Outcome::Failure {
            println!("      {}", step.output.failure_detail());
        }
    }
    for sub in &report.subtasks {
        println!(
            "  [{}] {:<16} {:<24} {}",
            sub.stack, sub.agent, sub.branch, sub.output.status
        );
        if !sub.output.is_success() {
            println!("      {}", sub.output.failure_detail());
        }
    }
    if let Some(reason) = &report.aborted {
        println!("Aborted: {}", reason);
    }
    println!("Result: {}", if report.success { "success" } else { "failure" });
}
