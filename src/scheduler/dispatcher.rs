use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::scheduler::events::{EventSink, SchedulerEvent};
use crate::scheduler::queue::{PriorityQueue, QueueKey};
use crate::scheduler::registry::{EvictedWorker, WorkerRegistry};
use crate::scheduler::store::{TaskStore, Transition};
use crate::scheduler::task::{NewTask, Priority, Task, TaskId, TaskResult, TaskStatus, WorkerId};

pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Task records and the pending queue, always mutated together.
#[derive(Debug, Default)]
pub struct TaskBook {
    pub store: TaskStore,
    pub queue: PriorityQueue,
}

impl TaskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task and enqueue it.
    pub fn submit(&mut self, new_task: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let task = self.store.create(new_task, now)?.clone();
        self.queue.push(task.id.clone(), QueueKey::of(&task));
        Ok(task)
    }
}

/// What a worker needs to run a task it has been bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub name: String,
    pub command: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl Assignment {
    pub(crate) fn from_task(task: &Task, worker_id: WorkerId, fallback_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            worker_id,
            name: task.name.clone(),
            command: task.command.clone(),
            priority: task.priority,
            status: task.status,
            assigned_at: task.assigned_at.unwrap_or(fallback_at),
            retry_count: task.retry_count,
        }
    }
}

/// How a lost worker's task was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Requeued { task_id: TaskId, retry_count: u32 },
    Exhausted { task_id: TaskId },
}

/// Matches pending tasks with idle workers and applies the requeue policy.
///
/// Every method expects the caller to hold the task book and the registry
/// exclusively for the whole call, so each bind is seen by others as a
/// single step.
pub struct Dispatcher {
    max_retries: u32,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(max_retries: u32, events: Arc<dyn EventSink>) -> Self {
        Self {
            max_retries,
            events,
        }
    }

    /// Bind pending tasks to idle workers until one side runs out.
    pub fn dispatch(
        &self,
        book: &mut TaskBook,
        registry: &mut WorkerRegistry,
        now: DateTime<Utc>,
    ) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        for worker_id in registry.list_idle() {
            let Some(task_id) = self.next_pending(book) else {
                break;
            };
            match self.bind(book, registry, task_id, &worker_id, now) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => self.violation(format!("dispatch to {worker_id} failed: {e}")),
            }
        }
        assignments
    }

    /// The worker's current assignment if it has one, otherwise bind it the
    /// next pending task. `None` means the queue is empty.
    pub fn assign_to(
        &self,
        book: &mut TaskBook,
        registry: &mut WorkerRegistry,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        if let Some(task_id) = registry.get(worker_id)?.bound_task() {
            let task = book.store.get(task_id)?;
            return Ok(Some(Assignment::from_task(task, worker_id.clone(), now)));
        }
        match self.next_pending(book) {
            Some(task_id) => self.bind(book, registry, task_id, worker_id, now).map(Some),
            None => Ok(None),
        }
    }

    /// Pop until a task that is really pending turns up.
    fn next_pending(&self, book: &mut TaskBook) -> Option<TaskId> {
        while let Some(task_id) = book.queue.pop() {
            match book.store.get(&task_id) {
                Ok(task) if task.status == TaskStatus::Pending => return Some(task_id),
                Ok(task) => self.violation(format!(
                    "queued task {task_id} has status {}",
                    task.status
                )),
                Err(_) => self.violation(format!("queued task {task_id} has no record")),
            }
        }
        None
    }

    /// Bind a popped task to an idle worker. On failure the task goes back
    /// to the queue untouched.
    fn bind(
        &self,
        book: &mut TaskBook,
        registry: &mut WorkerRegistry,
        task_id: TaskId,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Assignment> {
        let worker = match registry.get(worker_id) {
            Ok(worker) => worker,
            Err(e) => {
                self.restore(book, &task_id);
                return Err(e);
            }
        };
        if let Some(current) = worker.bound_task() {
            let err = SchedulerError::WorkerBusy {
                worker_id: worker_id.clone(),
                task_id: current.clone(),
            };
            self.restore(book, &task_id);
            return Err(err);
        }

        let task = book.store.transition(
            &task_id,
            Transition::Assign {
                worker_id: worker_id.clone(),
                at: now,
            },
        )?;
        let assignment = Assignment::from_task(task, worker_id.clone(), now);
        registry.mark_busy(worker_id, task_id.clone())?;

        self.events.emit(SchedulerEvent::TaskAssigned {
            task_id,
            worker_id: worker_id.clone(),
        });
        Ok(assignment)
    }

    fn restore(&self, book: &mut TaskBook, task_id: &TaskId) {
        if let Ok(task) = book.store.get(task_id) {
            if task.status == TaskStatus::Pending {
                book.queue.requeue(task_id.clone(), QueueKey::of(task));
            }
        }
    }

    /// Worker acknowledged it has started the task.
    pub fn start(
        &self,
        book: &mut TaskBook,
        registry: &mut WorkerRegistry,
        worker_id: &WorkerId,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.check_binding(book, registry, worker_id, task_id)?;
        registry.touch(worker_id, now)?;
        if book.store.get(task_id)?.status == TaskStatus::Running {
            return book.store.get(task_id).cloned();
        }
        let task = book
            .store
            .transition(task_id, Transition::Start { at: now })?
            .clone();
        self.events.emit(SchedulerEvent::TaskStarted {
            task_id: task_id.clone(),
            worker_id: worker_id.clone(),
        });
        Ok(task)
    }

    /// Fold an executor result into the task and free the worker.
    pub fn complete(
        &self,
        book: &mut TaskBook,
        registry: &mut WorkerRegistry,
        worker_id: &WorkerId,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let task_id = result.task_id.clone();
        self.check_binding(book, registry, worker_id, &task_id)?;
        registry.touch(worker_id, now)?;

        // The worker's clock is not ours: never finish in the future or
        // before the task started
        let mut finished_at = result.completed_at.min(now);

        // No separate start acknowledgement arrived, treat the result as one
        if book.store.get(&task_id)?.status == TaskStatus::Assigned {
            book.store
                .transition(&task_id, Transition::Start { at: finished_at })?;
        }
        if let Some(started_at) = book.store.get(&task_id)?.started_at {
            finished_at = finished_at.max(started_at);
        }

        let change = if result.success {
            Transition::Complete {
                output: result.output,
                at: finished_at,
            }
        } else {
            Transition::Fail {
                error: result
                    .error
                    .unwrap_or_else(|| "task reported failure".to_string()),
                output: result.output,
                at: finished_at,
            }
        };
        let task = book.store.transition(&task_id, change)?.clone();
        registry.mark_idle(worker_id, now)?;

        match task.status {
            TaskStatus::Completed => self.events.emit(SchedulerEvent::TaskCompleted {
                task_id,
                worker_id: worker_id.clone(),
            }),
            _ => self.events.emit(SchedulerEvent::TaskFailed {
                task_id,
                reason: task.error.clone().unwrap_or_default(),
            }),
        }
        Ok(task)
    }

    /// Requeue the task a lost worker was holding, or fail it once its
    /// retries are used up.
    pub fn recover(
        &self,
        book: &mut TaskBook,
        evicted: &EvictedWorker,
        now: DateTime<Utc>,
    ) -> Result<Option<Recovery>> {
        self.events.emit(SchedulerEvent::WorkerEvicted {
            worker_id: evicted.worker_id.clone(),
            task_id: evicted.task_id.clone(),
        });
        let Some(task_id) = &evicted.task_id else {
            return Ok(None);
        };

        let task = book.store.get(task_id)?;
        if task.retry_count < self.max_retries {
            let task = book.store.transition(task_id, Transition::Requeue)?;
            let retry_count = task.retry_count;
            book.queue.requeue(task_id.clone(), QueueKey::of(task));
            tracing::warn!(
                task_id = %task_id,
                worker_id = %evicted.worker_id,
                retry_count,
                "Requeued task from lost worker"
            );
            self.events.emit(SchedulerEvent::TaskRequeued {
                task_id: task_id.clone(),
                retry_count,
            });
            Ok(Some(Recovery::Requeued {
                task_id: task_id.clone(),
                retry_count,
            }))
        } else {
            book.store.transition(
                task_id,
                Transition::Fail {
                    error: MAX_RETRIES_EXCEEDED.to_string(),
                    output: None,
                    at: now,
                },
            )?;
            tracing::error!(
                task_id = %task_id,
                worker_id = %evicted.worker_id,
                max_retries = self.max_retries,
                "Task failed after losing too many workers"
            );
            self.events.emit(SchedulerEvent::TaskFailed {
                task_id: task_id.clone(),
                reason: MAX_RETRIES_EXCEEDED.to_string(),
            });
            Ok(Some(Recovery::Exhausted {
                task_id: task_id.clone(),
            }))
        }
    }

    /// The task must be active and bound to exactly this worker.
    fn check_binding(
        &self,
        book: &TaskBook,
        registry: &WorkerRegistry,
        worker_id: &WorkerId,
        task_id: &TaskId,
    ) -> Result<()> {
        let task = book.store.get(task_id)?;
        let not_assigned = || SchedulerError::NotAssigned {
            task_id: task_id.clone(),
            worker_id: worker_id.clone(),
        };
        if !task.status.is_active() || task.assigned_worker.as_ref() != Some(worker_id) {
            return Err(not_assigned());
        }
        match registry.get(worker_id)?.bound_task() {
            Some(bound) if bound == task_id => Ok(()),
            _ => Err(SchedulerError::Internal(format!(
                "task {task_id} names worker {worker_id} but the worker is not bound to it"
            ))),
        }
    }

    fn violation(&self, detail: String) {
        tracing::error!(detail = %detail, "Dispatcher invariant violated");
        self.events
            .emit(SchedulerEvent::InvariantViolation { detail });
    }
}

/// Cross-check store, queue and registry. Returns one line per problem.
pub fn check_consistency(book: &TaskBook, registry: &WorkerRegistry) -> Vec<String> {
    let mut problems = Vec::new();

    let mut queued = HashSet::new();
    for task_id in book.queue.ids() {
        if !queued.insert(task_id) {
            problems.push(format!("task {task_id} is queued more than once"));
        }
        match book.store.get(task_id) {
            Ok(task) if task.status != TaskStatus::Pending => {
                problems.push(format!("task {task_id} is queued but {}", task.status));
            }
            Ok(_) => {}
            Err(_) => problems.push(format!("queued task {task_id} has no record")),
        }
    }

    for task in book.store.iter() {
        match task.status {
            TaskStatus::Pending if !queued.contains(&task.id) => {
                problems.push(format!("pending task {} is not queued", task.id));
            }
            TaskStatus::Assigned | TaskStatus::Running => match &task.assigned_worker {
                None => problems.push(format!("{} task {} has no worker", task.status, task.id)),
                Some(worker_id) => match registry.get(worker_id) {
                    Ok(worker) if worker.bound_task() == Some(&task.id) => {}
                    Ok(_) => problems.push(format!(
                        "task {} names worker {worker_id} which is bound elsewhere",
                        task.id
                    )),
                    Err(_) => problems.push(format!(
                        "task {} names unknown worker {worker_id}",
                        task.id
                    )),
                },
            },
            _ => {}
        }
    }

    for worker in registry.workers() {
        if let Some(task_id) = worker.bound_task() {
            match book.store.get(task_id) {
                Ok(task)
                    if task.status.is_active()
                        && task.assigned_worker.as_ref() == Some(&worker.id) => {}
                Ok(task) => problems.push(format!(
                    "worker {} is busy with task {task_id} which is {}",
                    worker.id, task.status
                )),
                Err(_) => problems.push(format!(
                    "worker {} is busy with unknown task {task_id}",
                    worker.id
                )),
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::events::NullEventSink;
    use chrono::Duration;

    fn dispatcher(max_retries: u32) -> Dispatcher {
        Dispatcher::new(max_retries, Arc::new(NullEventSink))
    }

    fn submit(book: &mut TaskBook, name: &str, priority: Priority, at: DateTime<Utc>) -> TaskId {
        book.submit(NewTask::new(name, format!("echo {name}"), priority), at)
            .unwrap()
            .id
    }

    #[test]
    fn dispatch_pairs_until_a_side_runs_out() {
        let d = dispatcher(3);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();

        submit(&mut book, "a", Priority::Low, t0);
        let crit = submit(&mut book, "b", Priority::Critical, t0);
        registry.heartbeat(&WorkerId::from("w1"), t0);

        let assignments = d.dispatch(&mut book, &mut registry, t0);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].task_id, crit);
        assert_eq!(assignments[0].status, TaskStatus::Assigned);
        assert_eq!(book.queue.len(), 1);
        assert!(registry.list_idle().is_empty());
        assert!(check_consistency(&book, &registry).is_empty());
    }

    #[test]
    fn assign_to_redelivers_current_assignment() {
        let d = dispatcher(3);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let w1 = WorkerId::from("w1");
        registry.heartbeat(&w1, t0);

        assert!(d.assign_to(&mut book, &mut registry, &w1, t0).unwrap().is_none());

        let a = submit(&mut book, "a", Priority::Medium, t0);
        submit(&mut book, "b", Priority::Medium, t0);
        let first = d.assign_to(&mut book, &mut registry, &w1, t0).unwrap().unwrap();
        let again = d.assign_to(&mut book, &mut registry, &w1, t0).unwrap().unwrap();
        assert_eq!(first.task_id, a);
        assert_eq!(again, first);
        assert_eq!(book.queue.len(), 1);
    }

    #[test]
    fn complete_without_start_passes_through_running() {
        let d = dispatcher(3);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let w1 = WorkerId::from("w1");
        registry.heartbeat(&w1, t0);
        let id = submit(&mut book, "a", Priority::High, t0);
        d.dispatch(&mut book, &mut registry, t0);

        let result = TaskResult {
            task_id: id.clone(),
            success: true,
            output: Some("a\n".to_string()),
            error: None,
            completed_at: t0 + Duration::seconds(2),
        };
        let task = d.complete(&mut book, &mut registry, &w1, result, t0).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.started_at.is_some());
        assert_eq!(registry.list_idle(), vec![w1]);
        assert!(check_consistency(&book, &registry).is_empty());
    }

    #[test]
    fn completion_time_stays_between_start_and_now() {
        let d = dispatcher(3);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let w1 = WorkerId::from("w1");
        registry.heartbeat(&w1, t0);
        let early = submit(&mut book, "early", Priority::High, t0);
        let late = submit(&mut book, "late", Priority::Low, t0);
        d.dispatch(&mut book, &mut registry, t0);

        // Worker clock behind ours, with an explicit start
        d.start(&mut book, &mut registry, &w1, &early, t0 + Duration::seconds(10))
            .unwrap();
        let result = TaskResult {
            task_id: early.clone(),
            success: true,
            output: None,
            error: None,
            completed_at: t0,
        };
        let task = d
            .complete(&mut book, &mut registry, &w1, result, t0 + Duration::seconds(20))
            .unwrap();
        assert_eq!(task.started_at, Some(t0 + Duration::seconds(10)));
        assert_eq!(task.completed_at, task.started_at);

        // Worker clock ahead of ours, implicit start
        d.dispatch(&mut book, &mut registry, t0 + Duration::seconds(20));
        let result = TaskResult {
            task_id: late.clone(),
            success: false,
            output: None,
            error: Some("boom".to_string()),
            completed_at: t0 + Duration::hours(1),
        };
        let task = d
            .complete(&mut book, &mut registry, &w1, result, t0 + Duration::seconds(30))
            .unwrap();
        assert_eq!(task.completed_at, Some(t0 + Duration::seconds(30)));
        assert!(task.started_at <= task.completed_at);
    }

    #[test]
    fn report_from_wrong_worker_is_rejected() {
        let d = dispatcher(3);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let w1 = WorkerId::from("w1");
        let w2 = WorkerId::from("w2");
        registry.heartbeat(&w1, t0);
        let id = submit(&mut book, "a", Priority::High, t0);
        d.dispatch(&mut book, &mut registry, t0);
        registry.heartbeat(&w2, t0);

        let err = d.start(&mut book, &mut registry, &w2, &id, t0).unwrap_err();
        assert!(matches!(err, SchedulerError::NotAssigned { .. }));
        assert_eq!(book.store.get(&id).unwrap().status, TaskStatus::Assigned);
    }

    #[test]
    fn recover_requeues_then_exhausts() {
        let d = dispatcher(1);
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let id = submit(&mut book, "a", Priority::Low, t0);

        let w1 = WorkerId::from("w1");
        registry.heartbeat(&w1, t0);
        d.dispatch(&mut book, &mut registry, t0);
        let evicted = registry.evict_stale(t0 + Duration::minutes(10), std::time::Duration::from_secs(60));
        let recovery = d.recover(&mut book, &evicted[0], t0).unwrap();
        assert_eq!(
            recovery,
            Some(Recovery::Requeued {
                task_id: id.clone(),
                retry_count: 1
            })
        );
        assert_eq!(book.queue.peek(), Some(&id));

        let w2 = WorkerId::from("w2");
        registry.heartbeat(&w2, t0);
        d.dispatch(&mut book, &mut registry, t0);
        let evicted = registry.evict_stale(t0 + Duration::minutes(10), std::time::Duration::from_secs(60));
        let recovery = d.recover(&mut book, &evicted[0], t0).unwrap();
        assert_eq!(recovery, Some(Recovery::Exhausted { task_id: id.clone() }));

        let task = book.store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(MAX_RETRIES_EXCEEDED));
        assert!(book.queue.is_empty());
        assert!(check_consistency(&book, &registry).is_empty());
    }

    #[test]
    fn consistency_check_spots_orphaned_binding() {
        let mut book = TaskBook::new();
        let mut registry = WorkerRegistry::new();
        let t0 = Utc::now();
        let w1 = WorkerId::from("w1");
        registry.heartbeat(&w1, t0);
        registry.mark_busy(&w1, TaskId::from("ghost")).unwrap();
        submit(&mut book, "a", Priority::Low, t0);
        book.queue.pop();

        let problems = check_consistency(&book, &registry);
        assert_eq!(problems.len(), 2);
    }
}
