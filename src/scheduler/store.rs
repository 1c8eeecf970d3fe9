use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::scheduler::task::{NewTask, Priority, Task, TaskId, TaskStatus, WorkerId};

/// A status change together with the fields that travel with it.
#[derive(Debug, Clone)]
pub enum Transition {
    Assign {
        worker_id: WorkerId,
        at: DateTime<Utc>,
    },
    Start {
        at: DateTime<Utc>,
    },
    Complete {
        output: Option<String>,
        at: DateTime<Utc>,
    },
    Fail {
        error: String,
        output: Option<String>,
        at: DateTime<Utc>,
    },
    /// Back to Pending after the bound worker was lost.
    Requeue,
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Assign { .. } => TaskStatus::Assigned,
            Transition::Start { .. } => TaskStatus::Running,
            Transition::Complete { .. } => TaskStatus::Completed,
            Transition::Fail { .. } => TaskStatus::Failed,
            Transition::Requeue => TaskStatus::Pending,
        }
    }
}

/// Restricts [`TaskStore::list`] to matching tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            priority: None,
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
    }
}

/// Owns every task record and enforces the lifecycle graph.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    next_seq: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending task with a fresh ID.
    pub fn create(&mut self, new_task: NewTask, now: DateTime<Utc>) -> Result<&Task> {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = TaskId::generate(seq);
        self.insert(Task::new(id, seq, new_task, now))
    }

    fn insert(&mut self, task: Task) -> Result<&Task> {
        use std::collections::hash_map::Entry;

        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateId(task.id)),
            Entry::Vacant(slot) => Ok(slot.insert(task)),
        }
    }

    pub fn get(&self, id: &TaskId) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))
    }

    /// Apply a status change. Rejects any edge outside the lifecycle graph
    /// and leaves the record untouched when it does.
    pub fn transition(&mut self, id: &TaskId, change: Transition) -> Result<&Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;

        let to = change.target();
        if !task.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                task_id: id.clone(),
                from: task.status,
                to,
            });
        }

        match change {
            Transition::Assign { worker_id, at } => {
                task.assigned_worker = Some(worker_id);
                task.assigned_at = Some(at);
            }
            Transition::Start { at } => {
                task.started_at = Some(at);
            }
            Transition::Complete { output, at } => {
                task.output = output;
                task.error = None;
                task.completed_at = Some(at);
            }
            Transition::Fail { error, output, at } => {
                task.output = output;
                task.error = Some(error);
                task.completed_at = Some(at);
            }
            Transition::Requeue => {
                task.retry_count += 1;
                task.assigned_worker = None;
                task.assigned_at = None;
                task.started_at = None;
            }
        }
        task.status = to;
        Ok(task)
    }

    /// Matching tasks, oldest first. Borrows the store; callers that need to
    /// release their lock collect it into owned records.
    pub fn list(&self, filter: TaskFilter) -> impl Iterator<Item = &Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| filter.matches(t)).collect();
        tasks.sort_by_key(|t| (t.created_at, t.seq));
        tasks.into_iter()
    }

    /// Drop terminal tasks that finished before `cutoff`. Returns how many went.
    pub fn prune_finished(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
        before - self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_task(name: &str, priority: Priority) -> NewTask {
        NewTask::new(name, format!("echo {name}"), priority)
    }

    #[test]
    fn create_assigns_pending_status_and_sequence() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let first = store.create(new_task("a", Priority::Low), now).unwrap().clone();
        let second = store.create(new_task("b", Priority::High), now).unwrap().clone();

        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(first.created_at, now);
        assert_eq!(first.retry_count, 0);
        assert!(first.seq < second.seq);
        assert_ne!(first.id, second.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = TaskStore::new();
        let task = store.create(new_task("a", Priority::Low), Utc::now()).unwrap().clone();
        let err = store.insert(task.clone()).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateId(id) if id == task.id));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = TaskStore::new();
        assert!(matches!(
            store.get(&TaskId::from("missing")),
            Err(SchedulerError::TaskNotFound(_))
        ));
    }

    #[test]
    fn full_lifecycle_records_fields() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let id = store.create(new_task("a", Priority::Medium), now).unwrap().id.clone();

        let worker = WorkerId::from("w1");
        store
            .transition(&id, Transition::Assign { worker_id: worker.clone(), at: now })
            .unwrap();
        store.transition(&id, Transition::Start { at: now }).unwrap();
        let task = store
            .transition(
                &id,
                Transition::Complete {
                    output: Some("a\n".to_string()),
                    at: now + Duration::seconds(1),
                },
            )
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.assigned_worker, Some(worker));
        assert_eq!(task.output.as_deref(), Some("a\n"));
        assert_eq!(task.completed_at, Some(now + Duration::seconds(1)));
    }

    #[test]
    fn invalid_edge_leaves_task_untouched() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let id = store.create(new_task("a", Priority::Low), now).unwrap().id.clone();

        let err = store
            .transition(&id, Transition::Complete { output: None, at: now })
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
                ..
            }
        ));
        let task = store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn requeue_clears_binding_and_counts_retry() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let id = store.create(new_task("a", Priority::Low), now).unwrap().id.clone();
        store
            .transition(&id, Transition::Assign { worker_id: WorkerId::from("w1"), at: now })
            .unwrap();

        let task = store.transition(&id, Transition::Requeue).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.assigned_worker.is_none());
        assert_eq!(task.created_at, now);
    }

    #[test]
    fn list_filters_and_orders_by_creation() {
        let mut store = TaskStore::new();
        let t0 = Utc::now();
        let late = store
            .create(new_task("late", Priority::High), t0 + Duration::seconds(5))
            .unwrap()
            .id
            .clone();
        let early = store.create(new_task("early", Priority::High), t0).unwrap().id.clone();
        store.create(new_task("low", Priority::Low), t0).unwrap();

        let ids: Vec<TaskId> = store
            .list(TaskFilter {
                status: Some(TaskStatus::Pending),
                priority: Some(Priority::High),
            })
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec![early, late]);
        assert_eq!(store.list(TaskFilter::default()).count(), 3);
    }

    #[test]
    fn prune_only_drops_old_terminal_tasks() {
        let mut store = TaskStore::new();
        let now = Utc::now();
        let done = store.create(new_task("done", Priority::Low), now).unwrap().id.clone();
        let pending = store.create(new_task("pending", Priority::Low), now).unwrap().id.clone();
        store
            .transition(&done, Transition::Assign { worker_id: WorkerId::from("w1"), at: now })
            .unwrap();
        store
            .transition(
                &done,
                Transition::Fail {
                    error: "boom".to_string(),
                    output: None,
                    at: now,
                },
            )
            .unwrap();

        assert_eq!(store.prune_finished(now), 0);
        assert_eq!(store.prune_finished(now + Duration::seconds(1)), 1);
        assert!(store.get(&done).is_err());
        assert!(store.get(&pending).is_ok());
    }
}
