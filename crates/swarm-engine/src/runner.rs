use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use swarm_core::error::{Result, SwarmError};
use swarm_core::security::CommandOutput;
use swarm_core::traits::CommandRunner;
use swarm_core::types::Outcome;

const MAX_OUTPUT: usize = 30_000;

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT {
        let mut cut = MAX_OUTPUT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... (output truncated)");
    }
    text
}

/// Runs commands through `bash -c` with no policy of its own.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    working_dir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: String, timeout: Duration) -> BoxFuture<'_, Result<CommandOutput>> {
        Box::pin(async move {
            debug!(command = %command, "Executing shell command");

            let mut cmd = tokio::process::Command::new("bash");
            cmd.arg("-c").arg(&command).kill_on_drop(true);
            if let Some(dir) = &self.working_dir {
                cmd.current_dir(dir);
            }

            match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(Ok(output)) => Ok(CommandOutput {
                    status: if output.status.success() {
                        Outcome::Success
                    } else {
                        Outcome::Failure
                    },
                    exit_code: output.status.code(),
                    stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
                    stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
                }),
                Ok(Err(e)) => Err(SwarmError::Io(e)),
                Err(_) => Err(SwarmError::CommandTimeout {
                    command,
                    timeout_secs: timeout.as_secs(),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let out = ShellRunner::new()
            .run("echo hello".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.status, Outcome::Success);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let out = ShellRunner::new()
            .run("false".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.status, Outcome::Failure);
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let err = ShellRunner::new()
            .run("sleep 5".into(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::CommandTimeout { .. }));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = ShellRunner::in_dir(dir.path())
            .run("ls".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn long_output_is_truncated() {
        let text = truncate("x".repeat(MAX_OUTPUT + 10));
        assert!(text.ends_with("(output truncated)"));
    }
}
