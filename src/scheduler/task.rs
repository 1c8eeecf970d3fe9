use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Scheduler-generated task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Builds an ID from a submission sequence number plus a random suffix.
    /// The sequence keeps IDs readable and ordered; the suffix keeps them
    /// unique across scheduler restarts.
    pub fn generate(seq: u64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("t{:08}-{}", seq, &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Worker identifier, supplied by the worker itself (usually its hostname).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    /// Numeric level, 0 (low) to 3 (critical).
    pub fn level(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_level(level: i64) -> Result<Self, SchedulerError> {
        match level {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(SchedulerError::InvalidPriority(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Accepts a name in any case or a numeric level.
impl FromStr for Priority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => match trimmed.parse::<i64>() {
                Ok(level) => Priority::from_level(level),
                Err(_) => Err(SchedulerError::InvalidPriority(s.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Bound to a worker.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// The lifecycle graph. Assigned -> Failed is the edge a cancel or a
    /// failure report without a start acknowledgement takes.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, Running)
                | (Assigned, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Assigned, Pending)
                | (Running, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(SchedulerError::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub command: String,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Submission order, used to break ties between equal creation times
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_worker: Option<WorkerId>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl Task {
    pub fn new(id: TaskId, seq: u64, new_task: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new_task.name,
            description: new_task.description,
            command: new_task.command,
            priority: new_task.priority,
            status: TaskStatus::Pending,
            seq,
            created_at,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            assigned_worker: None,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// Validated fields of a task about to be created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub command: String,
    pub priority: Priority,
}

impl NewTask {
    pub fn new(name: impl Into<String>, command: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            priority,
        }
    }
}

/// A submission as it arrives from a client, priority still unparsed.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub description: String,
    pub command: String,
    pub priority: String,
}

impl SubmitRequest {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        priority: impl fmt::Display,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            priority: priority.to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(self) -> Result<NewTask, SchedulerError> {
        let priority = self.priority.parse::<Priority>()?;
        Ok(NewTask {
            name: self.name,
            description: self.description,
            command: self.command,
            priority,
        })
    }
}

/// What the executor reports back for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_low_to_critical() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn priority_parses_names_and_levels() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("0".parse::<Priority>().unwrap(), Priority::Low);
        assert_eq!(" 1 ".parse::<Priority>().unwrap(), Priority::Medium);
    }

    #[test]
    fn priority_rejects_unknown_values() {
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(SchedulerError::InvalidPriority(_))
        ));
        assert!(matches!(
            "4".parse::<Priority>(),
            Err(SchedulerError::InvalidPriority(_))
        ));
        assert!(Priority::from_level(-1).is_err());
    }

    #[test]
    fn priority_display_round_trips_through_parse() {
        for p in Priority::ALL {
            assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
        }
    }

    #[test]
    fn lifecycle_graph() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Assigned.can_transition_to(Pending));
        assert!(Running.can_transition_to(Pending));
        assert!(Assigned.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Assigned.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn generated_ids_differ_for_same_sequence() {
        let a = TaskId::generate(1);
        let b = TaskId::generate(1);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("t00000001-"));
    }

    #[test]
    fn submit_request_validation() {
        let ok = SubmitRequest::new("build", "make", Priority::High)
            .with_description("release build")
            .validate()
            .unwrap();
        assert_eq!(ok.priority, Priority::High);
        assert_eq!(ok.description, "release build");

        let bad = SubmitRequest::new("build", "make", "someday").validate();
        assert!(matches!(bad, Err(SchedulerError::InvalidPriority(p)) if p == "someday"));
    }

    #[test]
    fn status_parses_and_rejects_unknown() {
        assert_eq!("Running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!(matches!(
            "sleeping".parse::<TaskStatus>(),
            Err(SchedulerError::InvalidStatus(s)) if s == "sleeping"
        ));
    }
}
