//! Scheduler errors.

use braid_task::TaskState;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
  #[error("worker not found: {0}")]
  WorkerNotFound(String),

  #[error("worker already registered: {0}")]
  DuplicateWorker(String),

  #[error("task not found: {0}")]
  TaskNotFound(String),

  #[error("task {task_id} is {state}")]
  InvalidTaskState { task_id: String, state: TaskState },

  /// The wait timed out; the task is still pending or running.
  #[error("task {task_id} not ready")]
  NotReady { task_id: String },

  #[error("task {task_id} was cancelled")]
  Cancelled { task_id: String },

  #[error("scheduler loop already running")]
  AlreadyRunning,
}

/// Errors a worker transport reports for a dispatch attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
  #[error("worker {worker_id} unreachable: {message}")]
  Unreachable { worker_id: String, message: String },

  #[error("worker {worker_id} rejected task: {message}")]
  Rejected { worker_id: String, message: String },
}
