use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use swarm_core::config::ProcessConfig;
use swarm_core::error::{Result, SwarmError};
use swarm_core::traits::{Decomposer, StackResearcher, Worker};
use swarm_core::types::{HistoryEntry, Role, Subtask, WorkerContext, WorkerOutput};

/// Runs an external program with one JSON document on stdin and reads one
/// JSON document from stdout.
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    name: String,
    config: ProcessConfig,
}

impl ProcessAdapter {
    pub fn new(name: impl Into<String>, config: ProcessConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call<I, O>(&self, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_vec(input)?;
        let timeout_secs = self.config.timeout_secs;
        debug!(adapter = %self.name, command = %self.config.command, "Invoking process");

        let run = async {
            let mut child = tokio::process::Command::new(&self.config.command)
                .args(&self.config.args)
                .envs(&self.config.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
                // stdin dropped here so the child sees EOF
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SwarmError::Worker {
                    role: self.name.clone(),
                    message: format!("failed to run {}: {}", self.config.command, e),
                })
            }
            Err(_) => {
                return Err(SwarmError::WorkerTimeout {
                    role: self.name.clone(),
                    timeout_secs,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SwarmError::Worker {
                role: self.name.clone(),
                message: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| SwarmError::Worker {
            role: self.name.clone(),
            message: format!("invalid JSON on stdout: {}", e),
        })
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    task: &'a str,
    run_id: &'a str,
    namespace: &'a str,
    agent: &'a str,
    role: Role,
    task_type: &'a str,
    stack: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    history: &'a [HistoryEntry],
}

/// A command the worker wants run on its behalf.
#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default)]
    reason: String,
}

/// Worker backed by an external process.
///
/// A response may list `commands`; each one goes through the context's
/// command gate and the outputs are attached as `command_results`. A command
/// the gate refuses fails the step.
pub struct ProcessWorker {
    role: Role,
    adapter: ProcessAdapter,
}

impl ProcessWorker {
    pub fn new(role: Role, config: ProcessConfig) -> Self {
        Self {
            role,
            adapter: ProcessAdapter::new(role.as_str(), config),
        }
    }

    async fn run_requested_commands(
        &self,
        mut output: WorkerOutput,
        ctx: &WorkerContext,
    ) -> Result<WorkerOutput> {
        let Some(raw) = output.extra.remove("commands") else {
            return Ok(output);
        };
        let requests: Vec<CommandRequest> = serde_json::from_value(raw)?;
        if requests.is_empty() {
            return Ok(output);
        }
        let Some(gate) = &ctx.commands else {
            warn!(agent = %ctx.agent, "Worker requested commands but no command gate is available");
            return Ok(WorkerOutput::failure("command execution is not available"));
        };

        let mut results = Vec::new();
        for req in requests {
            match gate
                .run_command(req.command.clone(), req.reason, ctx.agent.clone())
                .await
            {
                Ok(out) => results.push(serde_json::to_value(&out)?),
                Err(e) => {
                    warn!(agent = %ctx.agent, command = %req.command, error = %e, "Requested command refused");
                    return Ok(WorkerOutput::failure(format!(
                        "command `{}` not executed: {}",
                        req.command, e
                    )));
                }
            }
        }
        output
            .extra
            .insert("command_results".to_string(), serde_json::Value::Array(results));
        Ok(output)
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    fn execute(&self, task: String, ctx: WorkerContext) -> BoxFuture<'_, Result<WorkerOutput>> {
        Box::pin(async move {
            let request = WorkerRequest {
                task: &task,
                run_id: &ctx.run_id,
                namespace: ctx.namespace.as_str(),
                agent: &ctx.agent,
                role: self.role,
                task_type: &ctx.task_type,
                stack: &ctx.stack,
                branch: ctx.branch.as_deref(),
                history: &ctx.history,
            };
            let output: WorkerOutput = self.adapter.call(&request).await?;
            self.run_requested_commands(output, &ctx).await
        })
    }
}

/// Accepts either `{"<key>": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Keyed(serde_json::Map<String, serde_json::Value>),
}

fn unwrap_list<T: DeserializeOwned>(response: ListResponse<T>, key: &str) -> Result<Vec<T>> {
    match response {
        ListResponse::Bare(items) => Ok(items),
        ListResponse::Keyed(mut map) => match map.remove(key) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        },
    }
}

/// Decomposer backed by an external process.
pub struct ProcessDecomposer {
    adapter: ProcessAdapter,
}

impl ProcessDecomposer {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            adapter: ProcessAdapter::new("decomposer", config),
        }
    }
}

impl Decomposer for ProcessDecomposer {
    fn decompose(
        &self,
        description: String,
        supported_stacks: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<Subtask>>> {
        Box::pin(async move {
            let input = serde_json::json!({
                "description": description,
                "supported_stacks": supported_stacks,
            });
            let response: ListResponse<Subtask> = self
                .adapter
                .call(&input)
                .await
                .map_err(|e| SwarmError::Decomposition(e.to_string()))?;
            unwrap_list(response, "subtasks").map_err(|e| SwarmError::Decomposition(e.to_string()))
        })
    }
}

/// Stack researcher backed by an external process.
pub struct ProcessResearcher {
    adapter: ProcessAdapter,
}

impl ProcessResearcher {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            adapter: ProcessAdapter::new("researcher", config),
        }
    }
}

impl StackResearcher for ProcessResearcher {
    fn research(&self, stack: String) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let response: ListResponse<String> = self
                .adapter
                .call(&serde_json::json!({ "stack": stack }))
                .await?;
            unwrap_list(response, "principles")
        })
    }
}
