use std::collections::BTreeSet;

use braid_task::{TaskOutcome, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
  Idle,
  /// Running exactly one task.
  Busy,
  /// Missed heartbeats.
  Offline,
  /// Last dispatch to this worker failed.
  Error,
}

/// A worker known to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
  pub id: String,
  pub address: String,
  pub capabilities: BTreeSet<String>,
  pub state: WorkerState,
  /// In `[0, 1]`.
  pub load: f64,
  pub last_seen: DateTime<Utc>,
  pub total_tasks: u64,
  pub successful_tasks: u64,
  pub current_task: Option<String>,
}

impl WorkerInfo {
  pub fn new<I, S>(id: impl Into<String>, address: impl Into<String>, capabilities: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      id: id.into(),
      address: address.into(),
      capabilities: capabilities.into_iter().map(Into::into).collect(),
      state: WorkerState::Idle,
      load: 0.0,
      last_seen: Utc::now(),
      total_tasks: 0,
      successful_tasks: 0,
      current_task: None,
    }
  }

  pub fn has_capability(&self, capability: &str) -> bool {
    self.capabilities.contains(capability)
  }

  /// Fraction of finished tasks that succeeded; `1.0` before any task.
  pub fn success_rate(&self) -> f64 {
    if self.total_tasks == 0 {
      return 1.0;
    }
    self.successful_tasks as f64 / self.total_tasks as f64
  }
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedTask {
  pub id: String,
  pub capability: String,
  pub input: Value,
  /// Higher runs first.
  pub priority: i32,
  pub state: TaskState,
  pub assigned_worker: Option<String>,
  pub result: Option<TaskOutcome>,
  pub created_at: DateTime<Utc>,
  pub assigned_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Reported by a transport (or worker) when a task finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
  pub task_id: String,
  pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
  pub id: String,
  pub state: WorkerState,
  pub load: f64,
  pub total_tasks: u64,
  pub success_rate: f64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
  pub total_workers: usize,
  /// Workers not marked offline.
  pub online_workers: usize,
  pub idle_workers: usize,
  pub busy_workers: usize,
  pub pending_tasks: usize,
  pub running_tasks: usize,
  pub completed_tasks: usize,
  pub failed_tasks: usize,
  pub workers: Vec<WorkerStats>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_worker_defaults() {
    let worker = WorkerInfo::new("w1", "10.0.0.1:7000", ["research", "docs"]);
    assert_eq!(worker.state, WorkerState::Idle);
    assert!(worker.has_capability("docs"));
    assert!(!worker.has_capability("deploy"));
    assert_eq!(worker.success_rate(), 1.0);
  }

  #[test]
  fn test_success_rate() {
    let mut worker = WorkerInfo::new("w1", "local", ["x"]);
    worker.total_tasks = 4;
    worker.successful_tasks = 3;
    assert_eq!(worker.success_rate(), 0.75);
  }
}
