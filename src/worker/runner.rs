use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};
use crate::scheduler::{Assignment, TaskStatus, WorkerId};
use crate::worker::executor::Executor;
use crate::worker::heartbeat::HeartbeatSender;
use crate::worker::link::SchedulerLink;

/// A worker bound to one master.
///
/// Runs two loops: a [`HeartbeatSender`] and a poll loop that asks for an
/// assignment every `poll_interval`, runs it to completion and reports back.
/// One task at a time. `L` is the [`Scheduler`](crate::scheduler::Scheduler)
/// itself for local workers or an [`ApiClient`](crate::client::ApiClient).
pub struct WorkerRunner<L, E> {
    worker_id: WorkerId,
    scheduler: Arc<L>,
    executor: E,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl<L: SchedulerLink, E: Executor> WorkerRunner<L, E> {
    pub fn new(
        worker_id: WorkerId,
        scheduler: Arc<L>,
        executor: E,
        heartbeat_interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            scheduler,
            executor,
            heartbeat_interval,
            poll_interval,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.worker_id, "Worker starting");

        // Register before the first poll so assign_next knows us. A remote
        // master may not be up yet; poll_once registers again on WorkerNotFound
        if let Err(e) = self.scheduler.heartbeat(&self.worker_id).await {
            tracing::warn!(worker_id = %self.worker_id, error = %e, "Worker registration failed");
        }

        let heartbeat = HeartbeatSender::new(self.worker_id.clone(), self.heartbeat_interval);
        let heartbeat_scheduler = self.scheduler.clone();
        let heartbeat_cancel = cancel.child_token();
        let heartbeat_handle = tokio::spawn(async move {
            heartbeat.run(heartbeat_scheduler, heartbeat_cancel).await;
        });

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(worker_id = %self.worker_id, error = %e, "Worker poll failed");
                    }
                }
            }
        }

        let _ = heartbeat_handle.await;
        tracing::info!(worker_id = %self.worker_id, "Worker stopped");
    }

    /// Fetch and run at most one assignment. Returns whether one was run.
    pub async fn poll_once(&self) -> Result<bool> {
        let assignment = match self.scheduler.assign_next(&self.worker_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return Ok(false),
            Err(SchedulerError::WorkerNotFound(_)) => {
                // Evicted while quiet; heartbeat to rejoin and try next tick
                self.scheduler.heartbeat(&self.worker_id).await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.execute(assignment).await?;
        Ok(true)
    }

    async fn execute(&self, assignment: Assignment) -> Result<()> {
        if assignment.status == TaskStatus::Assigned {
            self.scheduler
                .start_task(&self.worker_id, &assignment.task_id)
                .await?;
        }

        tracing::info!(
            worker_id = %self.worker_id,
            task_id = %assignment.task_id,
            command = %assignment.command,
            "Executing task"
        );
        let outcome = self.executor.execute(&assignment.command).await;
        let result = outcome.into_result(assignment.task_id.clone());

        match self.scheduler.report_result(&self.worker_id, result).await {
            Ok(task) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    task_id = %task.id,
                    status = %task.status,
                    "Task finished"
                );
                Ok(())
            }
            Err(SchedulerError::NotAssigned { task_id, .. }) => {
                // We were presumed lost and the task moved on without us
                tracing::warn!(
                    worker_id = %self.worker_id,
                    task_id = %task_id,
                    "Dropping result for task no longer assigned to this worker"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
