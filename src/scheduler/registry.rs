use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, SchedulerError};
use crate::scheduler::task::{TaskId, WorkerId};

/// Busy carries the bound task, so a busy worker without a task cannot exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy { task_id: TaskId },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// When the worker last became idle; orders idle workers for dispatch
    pub idle_since: DateTime<Utc>,
    #[serde(flatten)]
    pub state: WorkerState,
}

impl WorkerRecord {
    fn new(id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            registered_at: now,
            last_heartbeat: now,
            idle_since: now,
            state: WorkerState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn bound_task(&self) -> Option<&TaskId> {
        match &self.state {
            WorkerState::Idle => None,
            WorkerState::Busy { task_id } => Some(task_id),
        }
    }

    /// Silent for strictly longer than `timeout` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        (now - self.last_heartbeat)
            .to_std()
            .map(|silence| silence > timeout)
            .unwrap_or(false)
    }
}

/// A worker removed by the sweep, with the task it was holding if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedWorker {
    pub worker_id: WorkerId,
    pub task_id: Option<TaskId>,
}

/// Fleet membership and liveness.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unseen worker or refresh a known one. Busy/idle state is
    /// left alone. Returns true if the worker was newly registered.
    pub fn heartbeat(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> bool {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.last_heartbeat = now;
            false
        } else {
            self.workers
                .insert(worker_id.clone(), WorkerRecord::new(worker_id.clone(), now));
            tracing::info!(worker_id = %worker_id, "Worker registered");
            true
        }
    }

    pub fn get(&self, worker_id: &WorkerId) -> Result<&WorkerRecord> {
        self.workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.clone()))
    }

    /// Count a status report from the worker as proof of life.
    pub fn touch(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<()> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.clone()))?;
        worker.last_heartbeat = now;
        Ok(())
    }

    pub fn mark_busy(&mut self, worker_id: &WorkerId, task_id: TaskId) -> Result<()> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.clone()))?;
        if let WorkerState::Busy { task_id: current } = &worker.state {
            return Err(SchedulerError::WorkerBusy {
                worker_id: worker_id.clone(),
                task_id: current.clone(),
            });
        }
        worker.state = WorkerState::Busy { task_id };
        Ok(())
    }

    /// Release the worker. Returns the task it was bound to, if any.
    pub fn mark_idle(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<Option<TaskId>> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.clone()))?;
        let previous = std::mem::replace(&mut worker.state, WorkerState::Idle);
        match previous {
            WorkerState::Busy { task_id } => {
                worker.idle_since = now;
                Ok(Some(task_id))
            }
            WorkerState::Idle => Ok(None),
        }
    }

    /// Remove every worker silent for longer than `timeout`. Busy workers
    /// hand back their task so the caller can requeue it.
    pub fn evict_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<EvictedWorker> {
        let stale: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.is_stale(now, timeout))
            .map(|w| w.id.clone())
            .collect();

        let mut evicted: Vec<EvictedWorker> = stale
            .into_iter()
            .filter_map(|id| self.workers.remove(&id))
            .map(|worker| EvictedWorker {
                task_id: worker.bound_task().cloned(),
                worker_id: worker.id,
            })
            .collect();
        evicted.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        evicted
    }

    /// Idle workers, longest idle first, ties broken by ID.
    pub fn list_idle(&self) -> Vec<WorkerId> {
        let mut idle: Vec<&WorkerRecord> = self.workers.values().filter(|w| w.is_idle()).collect();
        idle.sort_by(|a, b| a.idle_since.cmp(&b.idle_since).then_with(|| a.id.cmp(&b.id)));
        idle.into_iter().map(|w| w.id.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// All workers, ordered by ID.
    pub fn workers(&self) -> Vec<&WorkerRecord> {
        let mut workers: Vec<&WorkerRecord> = self.workers.values().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }
}
