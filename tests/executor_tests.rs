use std::time::Duration;

use taskmaster::config::ExecutorConfig;
use taskmaster::scheduler::TaskId;
use taskmaster::worker::{Executor, ShellExecutor};

fn test_executor() -> ShellExecutor {
    ShellExecutor::new(ExecutorConfig::default())
}

#[tokio::test]
async fn test_execute_simple_command() {
    let result = test_executor().execute("echo hello").await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, Some("hello\n".to_string()));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_empty_output() {
    let result = test_executor().execute("true").await;

    assert!(result.success);
    assert!(result.output.is_none()); // Empty output should be None
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_large_output() {
    let result = test_executor().execute("seq 1 1000").await;

    assert!(result.success);
    assert_eq!(result.output.unwrap().lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let result = test_executor().execute("exit 3").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.error.as_deref(), Some("Exit code: Some(3)"));
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    let result = test_executor()
        .execute("echo 'error message' >&2 && exit 1")
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("error message"));
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let result = test_executor().execute("nonexistent_command_12345").await;

    assert!(!result.success);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_execute_piped_commands() {
    let result = test_executor().execute("echo 'hello world' | wc -w").await;

    assert!(result.success);
    assert_eq!(result.output.unwrap().trim(), "2");
}

#[tokio::test]
async fn test_execute_times_out() {
    let executor = ShellExecutor::new(ExecutorConfig {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    });

    let start = std::time::Instant::now();
    let result = executor.execute("sleep 5").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_missing_shell_reports_failure() {
    let executor = ShellExecutor::new(ExecutorConfig {
        shell: "/nonexistent/shell".to_string(),
        timeout: None,
    });

    let result = executor.execute("echo hi").await;
    assert!(!result.success);
    assert!(result.exit_code.is_none());
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_outcome_converts_to_task_result() {
    let outcome = test_executor().execute("echo converted").await;
    let result = outcome.into_result(TaskId::from("t-1"));

    assert_eq!(result.task_id, TaskId::from("t-1"));
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some("converted\n"));
}
