//! Scheduler events for observability.
//!
//! The scheduler reports what happens through an [`EventSink`] handed to it
//! at construction. It keeps no global counters of its own; whoever consumes
//! the events decides whether to log, aggregate or export them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::scheduler::task::{Priority, TaskId, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    TaskSubmitted {
        task_id: TaskId,
        priority: Priority,
    },
    /// A submission refused before it reached the queue.
    TaskRejected { reason: String },
    QueueDepthChanged { depth: usize },
    WorkerRegistered { worker_id: WorkerId },
    WorkerCountChanged { count: usize },
    TaskAssigned { task_id: TaskId, worker_id: WorkerId },
    TaskStarted { task_id: TaskId, worker_id: WorkerId },
    TaskCompleted { task_id: TaskId, worker_id: WorkerId },
    TaskFailed { task_id: TaskId, reason: String },
    TaskRequeued { task_id: TaskId, retry_count: u32 },
    WorkerEvicted {
        worker_id: WorkerId,
        task_id: Option<TaskId>,
    },
    /// The scheduler caught itself in an inconsistent state.
    InvariantViolation { detail: String },
}

/// Receives scheduler events.
///
/// Called while scheduler locks are held, so implementations must be quick
/// and must not call back into the scheduler.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SchedulerEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: SchedulerEvent) {}
}

/// Writes events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::TaskSubmitted { task_id, priority } => {
                tracing::info!(task_id = %task_id, priority = %priority, "Task submitted");
            }
            SchedulerEvent::TaskRejected { reason } => {
                tracing::warn!(reason = %reason, "Task rejected");
            }
            SchedulerEvent::QueueDepthChanged { depth } => {
                tracing::debug!(depth, "Queue depth changed");
            }
            SchedulerEvent::WorkerRegistered { worker_id } => {
                tracing::debug!(worker_id = %worker_id, "Worker joined");
            }
            SchedulerEvent::WorkerCountChanged { count } => {
                tracing::debug!(count, "Worker count changed");
            }
            SchedulerEvent::TaskAssigned { task_id, worker_id } => {
                tracing::info!(task_id = %task_id, worker_id = %worker_id, "Task assigned");
            }
            SchedulerEvent::TaskStarted { task_id, worker_id } => {
                tracing::debug!(task_id = %task_id, worker_id = %worker_id, "Task started");
            }
            SchedulerEvent::TaskCompleted { task_id, worker_id } => {
                tracing::info!(task_id = %task_id, worker_id = %worker_id, "Task completed");
            }
            SchedulerEvent::TaskFailed { task_id, reason } => {
                tracing::warn!(task_id = %task_id, reason = %reason, "Task failed");
            }
            SchedulerEvent::TaskRequeued {
                task_id,
                retry_count,
            } => {
                tracing::warn!(task_id = %task_id, retry_count, "Task requeued after worker loss");
            }
            SchedulerEvent::WorkerEvicted { worker_id, task_id } => {
                tracing::warn!(
                    worker_id = %worker_id,
                    task_id = ?task_id.as_ref().map(TaskId::as_str),
                    "Worker evicted"
                );
            }
            SchedulerEvent::InvariantViolation { detail } => {
                tracing::error!(detail = %detail, "Scheduler invariant violated");
            }
        }
    }
}

/// Forwards each event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: SchedulerEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Aggregates events into counters and gauges.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    evicted: AtomicU64,
    invariant_violations: AtomicU64,
    queue_depth: AtomicU64,
    worker_count: AtomicU64,
    by_priority: [AtomicU64; 4],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_requeued: u64,
    pub workers_evicted: u64,
    pub invariant_violations: u64,
    pub queue_depth: u64,
    pub worker_count: u64,
    pub tasks_by_priority: TasksByPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TasksByPriority {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tasks_submitted: load(&self.submitted),
            tasks_rejected: load(&self.rejected),
            tasks_completed: load(&self.completed),
            tasks_failed: load(&self.failed),
            tasks_requeued: load(&self.requeued),
            workers_evicted: load(&self.evicted),
            invariant_violations: load(&self.invariant_violations),
            queue_depth: load(&self.queue_depth),
            worker_count: load(&self.worker_count),
            tasks_by_priority: TasksByPriority {
                low: load(&self.by_priority[usize::from(Priority::Low.level())]),
                medium: load(&self.by_priority[usize::from(Priority::Medium.level())]),
                high: load(&self.by_priority[usize::from(Priority::High.level())]),
                critical: load(&self.by_priority[usize::from(Priority::Critical.level())]),
            },
        }
    }
}

impl EventSink for SchedulerStats {
    fn emit(&self, event: SchedulerEvent) {
        let bump = |c: &AtomicU64| {
            c.fetch_add(1, Ordering::Relaxed);
        };
        match event {
            SchedulerEvent::TaskSubmitted { priority, .. } => {
                bump(&self.submitted);
                bump(&self.by_priority[usize::from(priority.level())]);
            }
            SchedulerEvent::TaskRejected { .. } => bump(&self.rejected),
            SchedulerEvent::QueueDepthChanged { depth } => {
                self.queue_depth.store(depth as u64, Ordering::Relaxed);
            }
            SchedulerEvent::WorkerCountChanged { count } => {
                self.worker_count.store(count as u64, Ordering::Relaxed);
            }
            SchedulerEvent::TaskCompleted { .. } => bump(&self.completed),
            SchedulerEvent::TaskFailed { .. } => bump(&self.failed),
            SchedulerEvent::TaskRequeued { .. } => bump(&self.requeued),
            SchedulerEvent::WorkerEvicted { .. } => bump(&self.evicted),
            SchedulerEvent::InvariantViolation { .. } => bump(&self.invariant_violations),
            SchedulerEvent::WorkerRegistered { .. }
            | SchedulerEvent::TaskAssigned { .. }
            | SchedulerEvent::TaskStarted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SchedulerEvent>>);

    impl EventSink for Recorder {
        fn emit(&self, event: SchedulerEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn stats_aggregate_counters_and_gauges() {
        let stats = SchedulerStats::new();
        stats.emit(SchedulerEvent::TaskSubmitted {
            task_id: TaskId::from("a"),
            priority: Priority::High,
        });
        stats.emit(SchedulerEvent::TaskSubmitted {
            task_id: TaskId::from("b"),
            priority: Priority::High,
        });
        stats.emit(SchedulerEvent::TaskSubmitted {
            task_id: TaskId::from("c"),
            priority: Priority::Low,
        });
        stats.emit(SchedulerEvent::QueueDepthChanged { depth: 3 });
        stats.emit(SchedulerEvent::QueueDepthChanged { depth: 2 });
        stats.emit(SchedulerEvent::WorkerCountChanged { count: 4 });
        stats.emit(SchedulerEvent::TaskFailed {
            task_id: TaskId::from("a"),
            reason: "exit 1".to_string(),
        });

        let snap = stats.snapshot();
        assert_eq!(snap.tasks_submitted, 3);
        assert_eq!(snap.tasks_by_priority.high, 2);
        assert_eq!(snap.tasks_by_priority.low, 1);
        assert_eq!(snap.tasks_by_priority.critical, 0);
        assert_eq!(snap.queue_depth, 2);
        assert_eq!(snap.worker_count, 4);
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.tasks_completed, 0);
    }

    #[test]
    fn fanout_delivers_to_every_sink() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());

        fanout.emit(SchedulerEvent::QueueDepthChanged { depth: 1 });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(
            b.0.lock().unwrap()[0],
            SchedulerEvent::QueueDepthChanged { depth: 1 }
        );
    }

    #[test]
    fn empty_fanout_is_a_no_op() {
        FanoutSink::new().emit(SchedulerEvent::QueueDepthChanged { depth: 1 });
    }
}
