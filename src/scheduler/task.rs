use crate::classify::ErrorKind;
use crate::executor::{CrawlOutput, TaskParams};
use crate::ParsePriorityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique task identifier
///
/// Identifiers are handed out in increasing order, so comparing two ids
/// tells which task was added first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Dispatch preference, ordered `Low < Normal < High < Urgent`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    /// Waiting for a concurrency slot (also after a failed attempt that will be retried)
    Pending,
    /// Occupying a concurrency slot
    Running,
    Completed,
    /// Failed with its retry budget exhausted
    Failed,
}

impl TaskStatus {
    /// Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Description of a task to submit
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub priority: Priority,

    /// Payload handed to the executor untouched
    pub params: TaskParams,

    /// The task is not dispatched before this instant
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Retry budget; the scheduler default applies when unset
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    /// Creates a normal-priority spec for the given parameters
    pub fn new(params: TaskParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A scheduled unit of crawl work
///
/// Callers only ever see clones; the scheduler owns the live state.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub priority: Priority,
    pub params: TaskParams,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,

    /// Failed attempts that were retried; never exceeds `max_retries`
    pub retry_count: u32,
    pub max_retries: u32,

    /// Executor output of the successful attempt
    pub result: Option<CrawlOutput>,

    /// Message of the most recent failure
    pub last_error: Option<String>,

    /// Classification of the most recent failure
    pub last_error_kind: Option<ErrorKind>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn new(id: TaskId, spec: TaskSpec, default_max_retries: u32) -> Self {
        Self {
            id,
            priority: spec.priority,
            params: spec.params,
            scheduled_at: spec.scheduled_at,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            result: None,
            last_error: None,
            last_error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Pending and not scheduled for later than `now`
    pub fn is_admissible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }
}
