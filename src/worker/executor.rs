use std::future::Future;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::scheduler::{TaskId, TaskResult};

/// Outcome of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn into_result(self, task_id: TaskId) -> TaskResult {
        TaskResult {
            task_id,
            success: self.success,
            output: self.output,
            error: self.error,
            completed_at: Utc::now(),
        }
    }
}

/// Runs a task's command. The scheduler never looks inside; it only sees
/// the outcome, or silence if the worker dies first.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, command: &str) -> impl Future<Output = ExecutionOutcome> + Send;
}

/// Runs commands through a shell on the local machine.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    config: ExecutorConfig,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ShellExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    async fn run(&self, command: &str) -> std::io::Result<std::process::Output> {
        let child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("command timed out after {:?}", limit),
                )),
            },
            None => child.wait_with_output().await,
        }
    }

    fn process_output(
        command: &str,
        result: std::io::Result<std::process::Output>,
    ) -> ExecutionOutcome {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let error = if output.status.success() {
                    None
                } else if stderr.is_empty() {
                    Some(format!("Exit code: {:?}", exit_code))
                } else {
                    Some(stderr)
                };

                tracing::debug!(command, exit_code = ?exit_code, "Command finished");

                ExecutionOutcome {
                    success: output.status.success(),
                    exit_code,
                    output: if stdout.is_empty() { None } else { Some(stdout) },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(command, error = %e, "Command execution failed");
                ExecutionOutcome {
                    success: false,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl Executor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecutionOutcome {
        let result = self.run(command).await;
        Self::process_output(command, result)
    }
}
