use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::dispatcher::{check_consistency, Assignment, Dispatcher, TaskBook};
use crate::scheduler::events::{EventSink, NullEventSink, SchedulerEvent};
use crate::scheduler::registry::{EvictedWorker, WorkerRecord, WorkerRegistry};
use crate::scheduler::store::TaskFilter;
use crate::scheduler::task::{
    NewTask, SubmitRequest, Task, TaskId, TaskResult, TaskStatus, WorkerId,
};

/// Returned to a client after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// The scheduling engine as seen from the outside.
///
/// Two locks guard the state: `tasks` (store and queue) and `workers`
/// (registry). Anything touching both takes `tasks` first, so heartbeats
/// never wait on queue work unless they have to dispatch.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: RwLock<TaskBook>,
    workers: RwLock<WorkerRegistry>,
    dispatcher: Dispatcher,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(NullEventSink), Arc::new(SystemClock))
    }

    pub fn with_events(config: SchedulerConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        Self::with_parts(config, events, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: SchedulerConfig,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dispatcher: Dispatcher::new(config.max_retries, events.clone()),
            config,
            tasks: RwLock::new(TaskBook::new()),
            workers: RwLock::new(WorkerRegistry::new()),
            events,
            clock,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The scheduler's notion of the current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate a client submission, create the task and enqueue it.
    /// An unrecognised priority is refused before anything is stored.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submission> {
        match request.validate() {
            Ok(new_task) => self.submit_task(new_task).await,
            Err(e) => {
                self.events.emit(SchedulerEvent::TaskRejected {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn submit_task(&self, new_task: NewTask) -> Result<Submission> {
        let now = self.clock.now();
        let mut book = self.tasks.write().await;
        let task = self.surface(book.submit(new_task, now))?;
        tracing::debug!(task_id = %task.id, priority = %task.priority, "Task enqueued");
        self.events.emit(SchedulerEvent::TaskSubmitted {
            task_id: task.id.clone(),
            priority: task.priority,
        });

        let mut registry = self.workers.write().await;
        self.dispatcher.dispatch(&mut book, &mut registry, now);
        let status = book.store.get(&task.id).map(|t| t.status)?;
        self.queue_depth(&book);

        Ok(Submission {
            task_id: task.id,
            status,
        })
    }

    /// Record a heartbeat. An idle worker is offered pending work, and the
    /// worker's current assignment, if any, is returned.
    pub async fn heartbeat(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        let idle = {
            let mut registry = self.workers.write().await;
            if registry.heartbeat(worker_id, self.clock.now()) {
                self.events.emit(SchedulerEvent::WorkerRegistered {
                    worker_id: worker_id.clone(),
                });
                self.events.emit(SchedulerEvent::WorkerCountChanged {
                    count: registry.count(),
                });
            }
            registry.get(worker_id)?.is_idle()
        };

        if idle {
            self.dispatch().await;
        }
        self.current_assignment(worker_id).await
    }

    /// Bind pending tasks to idle workers.
    pub async fn dispatch(&self) -> Vec<Assignment> {
        let mut book = self.tasks.write().await;
        if book.queue.is_empty() {
            return Vec::new();
        }
        let mut registry = self.workers.write().await;
        let assignments = self.dispatcher.dispatch(&mut book, &mut registry, self.clock.now());
        if !assignments.is_empty() {
            self.queue_depth(&book);
        }
        assignments
    }

    /// Poll for work. Returns the worker's current assignment, or binds it
    /// the next pending task, or `None` when there is nothing to do.
    pub async fn assign_next(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        let now = self.clock.now();
        let mut book = self.tasks.write().await;
        let mut registry = self.workers.write().await;
        let depth = book.queue.len();
        let assignment = self
            .dispatcher
            .assign_to(&mut book, &mut registry, worker_id, now);
        let assignment = self.surface(assignment)?;
        if book.queue.len() != depth {
            self.queue_depth(&book);
        }
        Ok(assignment)
    }

    async fn current_assignment(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        let book = self.tasks.read().await;
        let registry = self.workers.read().await;
        let Some(task_id) = registry.get(worker_id)?.bound_task() else {
            return Ok(None);
        };
        let task = book.store.get(task_id)?;
        Ok(Some(Assignment::from_task(
            task,
            worker_id.clone(),
            task.created_at,
        )))
    }

    /// Worker acknowledges it has begun executing the task.
    pub async fn start_task(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<Task> {
        let now = self.clock.now();
        let mut book = self.tasks.write().await;
        let mut registry = self.workers.write().await;
        let started = self
            .dispatcher
            .start(&mut book, &mut registry, worker_id, task_id, now);
        self.surface(started)
    }

    /// Apply an executor result, free the worker and hand it the next task.
    pub async fn report_result(&self, worker_id: &WorkerId, result: TaskResult) -> Result<Task> {
        let now = self.clock.now();
        let mut book = self.tasks.write().await;
        let mut registry = self.workers.write().await;
        let task = self
            .dispatcher
            .complete(&mut book, &mut registry, worker_id, result, now);
        let task = self.surface(task)?;

        if !book.queue.is_empty() {
            self.dispatcher.dispatch(&mut book, &mut registry, now);
            self.queue_depth(&book);
        }
        Ok(task)
    }

    /// Evict workers silent past the configured timeout.
    pub async fn evict_stale(&self) -> Vec<EvictedWorker> {
        self.evict_stale_after(self.config.worker_timeout).await
    }

    /// Evict workers silent for longer than `timeout`, requeueing or failing
    /// whatever they were running, then redistribute.
    pub async fn evict_stale_after(&self, timeout: Duration) -> Vec<EvictedWorker> {
        let now = self.clock.now();
        let mut book = self.tasks.write().await;
        let mut registry = self.workers.write().await;

        let evicted = registry.evict_stale(now, timeout);
        if evicted.is_empty() {
            return evicted;
        }

        for lost in &evicted {
            tracing::warn!(
                worker_id = %lost.worker_id,
                task_id = ?lost.task_id.as_ref().map(TaskId::as_str),
                "Evicting worker after missed heartbeats"
            );
            if let Err(e) = self.dispatcher.recover(&mut book, lost, now) {
                let _ = self.surface::<()>(Err(e));
            }
        }
        self.events.emit(SchedulerEvent::WorkerCountChanged {
            count: registry.count(),
        });

        self.dispatcher.dispatch(&mut book, &mut registry, now);
        self.queue_depth(&book);
        evicted
    }

    /// Drop finished tasks older than the retention window.
    pub async fn prune_finished(&self) -> usize {
        let Ok(retention) = ChronoDuration::from_std(self.config.finished_task_retention) else {
            return 0;
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(retention) else {
            return 0;
        };
        let pruned = self.tasks.write().await.store.prune_finished(cutoff);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished tasks");
        }
        pruned
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.tasks.read().await.store.get(task_id).cloned()
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .store
            .list(filter)
            .cloned()
            .collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.tasks.read().await.queue.len()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.count()
    }

    pub async fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers.read().await.list_idle()
    }

    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.workers
            .read()
            .await
            .workers()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Check that every task's status matches where it lives.
    pub async fn verify_consistency(&self) -> Result<()> {
        let book = self.tasks.read().await;
        let registry = self.workers.read().await;
        let problems = check_consistency(&book, &registry);
        if problems.is_empty() {
            Ok(())
        } else {
            self.surface(Err(SchedulerError::Internal(problems.join("; "))))
        }
    }

    fn queue_depth(&self, book: &TaskBook) {
        self.events.emit(SchedulerEvent::QueueDepthChanged {
            depth: book.queue.len(),
        });
    }

    /// Log and report structural errors before passing them on.
    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_structural() {
                tracing::error!(error = %e, "Scheduler invariant violated");
                self.events.emit(SchedulerEvent::InvariantViolation {
                    detail: e.to_string(),
                });
            }
        }
        result
    }
}
