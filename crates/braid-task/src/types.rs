use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
  Created,
  Queued,
  Running,
  Paused,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  /// Terminal states are never left.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskState::Completed | TaskState::Failed | TaskState::Cancelled
    )
  }
}

impl fmt::Display for TaskState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TaskState::Created => "created",
      TaskState::Queued => "queued",
      TaskState::Running => "running",
      TaskState::Paused => "paused",
      TaskState::Completed => "completed",
      TaskState::Failed => "failed",
      TaskState::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// Scheduling priority. Higher values dequeue first.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
  Low = 1,
  #[default]
  Normal = 2,
  High = 3,
  Critical = 4,
}

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
  pub success: bool,
  #[serde(default)]
  pub data: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl TaskOutcome {
  pub fn ok(data: Value) -> Self {
    Self {
      success: true,
      data,
      error: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      success: false,
      data: Value::Null,
      error: Some(error.into()),
    }
  }
}

/// Everything known about one submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
  pub id: String,
  pub capability: String,
  /// Agent that owns the task.
  pub agent_id: String,
  pub state: TaskState,
  pub priority: TaskPriority,
  pub dependencies: Vec<String>,
  pub input: Value,
  pub result: Option<TaskOutcome>,
  pub error: Option<String>,
  pub metadata: HashMap<String, Value>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_priority_ordering() {
    assert!(TaskPriority::Critical > TaskPriority::High);
    assert!(TaskPriority::High > TaskPriority::Normal);
    assert!(TaskPriority::Normal > TaskPriority::Low);
    assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    assert_eq!(TaskPriority::High as i32, 3);
  }

  #[test]
  fn test_terminal_states() {
    assert!(TaskState::Completed.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
    assert!(!TaskState::Running.is_terminal());
    assert!(!TaskState::Queued.is_terminal());
  }

  #[test]
  fn test_outcome_serialization() {
    let outcome = TaskOutcome::failed("boom");
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "boom");
  }
}
