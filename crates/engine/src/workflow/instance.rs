//! Workflow instances and per-task state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DefinitionRef, WorkflowDefinition};

/// Shared scratch space visible to every task of an instance
pub type WorkflowContext = serde_json::Map<String, serde_json::Value>;

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Submitted, not started
    Pending,

    /// Dispatching and running tasks
    Running,

    /// No new tasks are dispatched until resumed
    Paused,

    /// Every task completed
    Completed,

    /// At least one task failed and nothing else can make progress
    Failed,

    /// Cancelled by a caller
    Cancelled,
}

impl WorkflowStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `to`
    pub fn can_transition_to(self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Completed)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown workflow status: {}", other)),
        }
    }
}

/// Task status within an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskFailureKind {
    /// The handler returned an error
    Handler,
    /// The attempt exceeded its deadline
    Timeout,
    /// No handler is registered for the task's `handler_ref`
    UnknownHandler,
    /// The handler panicked
    Panicked,
    /// The process running the attempt stopped before it returned
    Interrupted,
}

/// Error recorded for a failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: TaskFailureKind,
    pub message: String,
    pub retryable: bool,
    /// Attempt (1-based) that produced this failure
    pub attempt: u32,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt {}: {}", self.attempt, self.message)
    }
}

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Completed,
    Failed,
    /// The attempt returned after its task had been cancelled
    Discarded,
    /// The attempt never returned; found `RUNNING` on recovery
    Interrupted,
}

/// One entry of a task's attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

/// Per-task-per-instance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<TaskFailure>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Every attempt made so far, oldest first
    #[serde(default)]
    pub history: Vec<AttemptRecord>,
}

impl TaskState {
    /// Fresh state for a task that has not run yet
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempt_count: 0,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            history: vec![],
        }
    }
}

/// One tenant-scoped execution of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: Uuid,
    pub tenant_id: String,
    pub definition_ref: DefinitionRef,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub context: WorkflowContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a pending instance of `definition` for `tenant_id`
    pub fn new(
        tenant_id: impl Into<String>,
        definition: &WorkflowDefinition,
        context: WorkflowContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::now_v7(),
            tenant_id: tenant_id.into(),
            definition_ref: definition.reference(),
            status: WorkflowStatus::Pending,
            context,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub instance: WorkflowInstance,
    pub tasks: Vec<TaskState>,
}

impl WorkflowStatusReport {
    /// State of a single task
    pub fn task(&self, task_id: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Whether the instance reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.instance.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::TaskDefinition;

    #[test]
    fn test_status_serializes_verbatim() {
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Skipped).unwrap(),
            "\"SKIPPED\""
        );
        assert_eq!(
            "PAUSED".parse::<WorkflowStatus>().unwrap(),
            WorkflowStatus::Paused
        );
        assert!("paused".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        use WorkflowStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Paused));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Paused));
    }

    #[test]
    fn test_new_instance_is_pending() {
        let definition =
            WorkflowDefinition::new("etl", 1).with_task(TaskDefinition::new("a", "noop"));
        let instance = WorkflowInstance::new("tenant-a", &definition, WorkflowContext::new());

        assert_eq!(instance.status, WorkflowStatus::Pending);
        assert_eq!(instance.definition_ref, DefinitionRef::new("etl", 1));
        assert!(instance.completed_at.is_none());
    }

    #[test]
    fn test_task_state_round_trips_field_names() {
        let state = TaskState::pending("a");
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["task_id"], "a");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["attempt_count"], 0);
    }
}
