use std::future::Future;

use crate::error::Result;
use crate::scheduler::{Assignment, Scheduler, Task, TaskId, TaskResult, WorkerId};

/// The worker's view of the master.
///
/// Implemented by [`Scheduler`] for workers that share the master's process,
/// and by [`ApiClient`](crate::client::ApiClient) for workers that reach it
/// over HTTP. Errors keep their scheduler meaning on both sides, so a runner
/// reacts the same way to `WorkerNotFound` or `NotAssigned` wherever it lives.
pub trait SchedulerLink: Send + Sync + 'static {
    fn heartbeat(
        &self,
        worker_id: &WorkerId,
    ) -> impl Future<Output = Result<Option<Assignment>>> + Send;

    fn assign_next(
        &self,
        worker_id: &WorkerId,
    ) -> impl Future<Output = Result<Option<Assignment>>> + Send;

    fn start_task(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
    ) -> impl Future<Output = Result<Task>> + Send;

    fn report_result(
        &self,
        worker_id: &WorkerId,
        result: TaskResult,
    ) -> impl Future<Output = Result<Task>> + Send;
}

impl SchedulerLink for Scheduler {
    async fn heartbeat(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        Scheduler::heartbeat(self, worker_id).await
    }

    async fn assign_next(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        Scheduler::assign_next(self, worker_id).await
    }

    async fn start_task(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<Task> {
        Scheduler::start_task(self, worker_id, task_id).await
    }

    async fn report_result(&self, worker_id: &WorkerId, result: TaskResult) -> Result<Task> {
        Scheduler::report_result(self, worker_id, result).await
    }
}
