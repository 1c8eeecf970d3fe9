use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::scheduler::task::{Priority, Task, TaskId};

/// Position of a task in the pending queue.
///
/// Priority first, then creation time, then submission sequence. A requeued
/// task carries the key it was created with, never a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
}

impl QueueKey {
    pub fn of(task: &Task) -> Self {
        Self {
            priority: task.priority,
            created_at: task.created_at,
            seq: task.seq,
        }
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then older, then lower sequence
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    key: QueueKey,
    task_id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of pending task IDs. Never blocks; an empty pop is `None`.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task_id: TaskId, key: QueueKey) {
        self.heap.push(QueueEntry { key, task_id });
    }

    /// Put back a task that was popped earlier. `key` must be the one the
    /// task was first pushed with so it keeps its place among equals.
    pub fn requeue(&mut self, task_id: TaskId, key: QueueKey) {
        self.push(task_id, key);
    }

    pub fn pop(&mut self) -> Option<TaskId> {
        self.heap.pop().map(|entry| entry.task_id)
    }

    pub fn peek(&self) -> Option<&TaskId> {
        self.heap.peek().map(|entry| &entry.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.heap.iter().map(|entry| &entry.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(priority: Priority, created_at: DateTime<Utc>, seq: u64) -> QueueKey {
        QueueKey {
            priority,
            created_at,
            seq,
        }
    }

    #[test]
    fn pops_highest_priority_first() {
        let t0 = Utc::now();
        let mut queue = PriorityQueue::new();
        queue.push(TaskId::from("low"), key(Priority::Low, t0, 1));
        queue.push(TaskId::from("crit"), key(Priority::Critical, t0 + Duration::seconds(3), 2));
        queue.push(TaskId::from("med"), key(Priority::Medium, t0, 3));
        queue.push(TaskId::from("high"), key(Priority::High, t0, 4));

        let order: Vec<TaskId> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(
            order,
            vec![
                TaskId::from("crit"),
                TaskId::from("high"),
                TaskId::from("med"),
                TaskId::from("low")
            ]
        );
        assert!(queue.pop().is_none());
    }

    #[test]
    fn equal_priority_is_fifo_by_creation_time() {
        let t0 = Utc::now();
        let mut queue = PriorityQueue::new();
        queue.push(TaskId::from("second"), key(Priority::High, t0 + Duration::seconds(1), 1));
        queue.push(TaskId::from("first"), key(Priority::High, t0, 2));
        queue.push(TaskId::from("third"), key(Priority::High, t0 + Duration::seconds(2), 3));

        assert_eq!(queue.pop(), Some(TaskId::from("first")));
        assert_eq!(queue.pop(), Some(TaskId::from("second")));
        assert_eq!(queue.pop(), Some(TaskId::from("third")));
    }

    #[test]
    fn identical_timestamps_fall_back_to_sequence() {
        let t0 = Utc::now();
        let mut queue = PriorityQueue::new();
        queue.push(TaskId::from("b"), key(Priority::Low, t0, 2));
        queue.push(TaskId::from("a"), key(Priority::Low, t0, 1));

        assert_eq!(queue.peek(), Some(&TaskId::from("a")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeue_keeps_original_place_among_equals() {
        let t0 = Utc::now();
        let mut queue = PriorityQueue::new();
        let a = key(Priority::Medium, t0, 1);
        queue.push(TaskId::from("a"), a);

        // a is handed out, then b and c arrive while a is running
        assert_eq!(queue.pop(), Some(TaskId::from("a")));
        queue.push(TaskId::from("b"), key(Priority::Medium, t0 + Duration::seconds(1), 2));
        queue.push(TaskId::from("c"), key(Priority::Medium, t0 + Duration::seconds(2), 3));

        // a's worker is lost and a comes back with its original key
        queue.requeue(TaskId::from("a"), a);
        assert_eq!(queue.pop(), Some(TaskId::from("a")));
        assert_eq!(queue.pop(), Some(TaskId::from("b")));
        assert_eq!(queue.pop(), Some(TaskId::from("c")));
    }

    #[test]
    fn requeue_does_not_skip_ahead_of_older_tasks() {
        let t0 = Utc::now();
        let mut queue = PriorityQueue::new();
        queue.push(TaskId::from("older"), key(Priority::Medium, t0, 1));
        queue.requeue(
            TaskId::from("younger"),
            key(Priority::Medium, t0 + Duration::seconds(10), 2),
        );
        assert_eq!(queue.pop(), Some(TaskId::from("older")));
        assert_eq!(queue.pop(), Some(TaskId::from("younger")));
    }
}
