//! Orchestrator errors.

use braid_task::TaskError;
use braid_workflow::WorkflowError;
use thiserror::Error;

use crate::instance::InstanceState;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error("workflow definition already registered: {0}")]
  DuplicateDefinition(String),

  #[error("invalid workflow definition '{workflow_id}': {source}")]
  InvalidDefinition {
    workflow_id: String,
    #[source]
    source: WorkflowError,
  },

  #[error("workflow definition not found: {0}")]
  DefinitionNotFound(String),

  #[error("workflow instance not found: {0}")]
  InstanceNotFound(String),

  #[error("cannot {operation} instance {instance_id} in state {state}")]
  InvalidState {
    instance_id: String,
    state: InstanceState,
    operation: &'static str,
  },

  #[error("timed out waiting for instance {instance_id}")]
  Timeout { instance_id: String },
}

/// Why a node (and with it the instance) failed. Recorded on the instance as
/// its error message.
#[derive(Debug, Error)]
pub enum NodeExecutionError {
  #[error("node '{node_id}' not found in workflow")]
  NodeNotFound { node_id: String },

  #[error("task node '{node_id}' has no capability")]
  MissingCapability { node_id: String },

  #[error("failed to resolve input for node '{node_id}': {message}")]
  InputResolution { node_id: String, message: String },

  #[error("task for node '{node_id}' could not run: {source}")]
  Task {
    node_id: String,
    #[source]
    source: TaskError,
  },

  #[error("task for node '{node_id}' failed: {message}")]
  TaskFailed { node_id: String, message: String },

  #[error("no progress after {cycles} cycles; waiting on {waiting:?}")]
  DependencyUnsatisfiable { waiting: Vec<String>, cycles: u32 },
}
