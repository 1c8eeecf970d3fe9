//! Scheduling core: task records, the pending queue, the worker fleet and
//! the dispatcher that binds one to the other.
//!
//! # Components
//!
//! - [`TaskStore`]: owns task records and enforces the lifecycle graph
//! - [`PriorityQueue`]: pending task IDs, highest priority and oldest first
//! - [`WorkerRegistry`]: fleet membership, liveness and busy/idle state
//! - [`Dispatcher`]: binds tasks to workers and requeues work from lost workers
//! - [`Scheduler`]: the above behind two locks, plus event emission
//!
//! # Lifecycle
//!
//! ```text
//! Pending -> Assigned -> Running -> Completed | Failed
//!    ^          |           |
//!    +----------+-----------+   (worker lost, retries left)
//! ```

pub mod dispatcher;
pub mod events;
pub mod queue;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;

pub use dispatcher::{Assignment, Dispatcher, Recovery, TaskBook};
pub use events::{EventSink, NullEventSink, SchedulerEvent, SchedulerStats, TracingEventSink};
pub use queue::{PriorityQueue, QueueKey};
pub use registry::{EvictedWorker, WorkerRecord, WorkerRegistry, WorkerState};
pub use service::{Scheduler, Submission};
pub use store::{TaskFilter, TaskStore, Transition};
pub use task::{NewTask, Priority, SubmitRequest, Task, TaskId, TaskResult, TaskStatus, WorkerId};
