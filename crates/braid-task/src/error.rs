//! Task lifecycle errors.

use thiserror::Error;

/// Errors returned by agents, pools and the lifecycle manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
  #[error("capability not registered: {0}")]
  CapabilityNotFound(String),

  #[error("capability already registered: {0}")]
  DuplicateCapability(String),

  #[error("task not found: {0}")]
  TaskNotFound(String),

  #[error("unknown dependency '{dependency}'")]
  UnknownDependency { dependency: String },

  /// The wait timed out; the task keeps running.
  #[error("task {task_id} not ready")]
  NotReady { task_id: String },

  #[error("task {task_id} was cancelled")]
  Cancelled { task_id: String },

  #[error("agent {agent_id} is shut down")]
  ShutDown { agent_id: String },
}

/// Errors an executor may return. Any of these fails the task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskExecutionError {
  /// The executor observed its cancellation token.
  #[error("task cancelled")]
  Cancelled,

  #[error("invalid task input: {message}")]
  InvalidInput { message: String },

  #[error("task execution failed: {message}")]
  Failed { message: String },
}
