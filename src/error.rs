use thiserror::Error;

use crate::scheduler::{TaskId, TaskStatus, WorkerId};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Duplicate task ID: {0}")]
    DuplicateId(TaskId),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Invalid task status: {0}")]
    InvalidStatus(String),

    #[error("Worker {worker_id} is already bound to task {task_id}")]
    WorkerBusy { worker_id: WorkerId, task_id: TaskId },

    #[error("Task {task_id} is not assigned to worker {worker_id}")]
    NotAssigned { task_id: TaskId, worker_id: WorkerId },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An error response from a remote scheduler that has no closer match.
    #[error("Scheduler returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Errors that mean the scheduler's own invariants were broken, as opposed
    /// to routine outcomes like a stale lookup.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidTransition { .. }
                | SchedulerError::DuplicateId(_)
                | SchedulerError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
