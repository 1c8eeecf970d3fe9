//! Worker side: running task commands and staying alive.
//!
//! - [`ShellExecutor`]: runs `sh -c <command>` and captures output
//! - [`HeartbeatSender`]: keeps a worker registered with the scheduler
//! - [`WorkerRunner`]: polls for assignments, executes them and reports
//!   results, either inside the master or against it over HTTP
//! - [`SchedulerLink`]: how a runner reaches the master
//!
//! # Execution Flow
//!
//! 1. Runner polls [`SchedulerLink::assign_next`]
//! 2. Acknowledges the start, then hands the command to its [`Executor`]
//! 3. Reports the outcome, which frees the worker for the next task
//!
//! # Security Note
//!
//! Commands run unsandboxed with the privileges of the worker process.

pub mod executor;
pub mod heartbeat;
pub mod link;
pub mod runner;

pub use executor::{ExecutionOutcome, Executor, ShellExecutor};
pub use heartbeat::HeartbeatSender;
pub use link::SchedulerLink;
pub use runner::WorkerRunner;
