use thiserror::Error;

/// Validation errors for workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("workflow has no start node")]
  MissingStartNode,

  #[error("start node not found: {0}")]
  StartNodeNotFound(String),

  #[error("workflow has no end nodes")]
  NoEndNodes,

  #[error("end node not found: {0}")]
  EndNodeNotFound(String),

  #[error("no end node is reachable from start node '{start}'")]
  UnreachableEndNodes { start: String },

  #[error("workflow graph contains a cycle")]
  CycleDetected,

  #[error("task node '{0}' has no capability")]
  MissingCapability(String),

  #[error("node '{node_id}' cannot be added as a {kind} node")]
  InvalidNodeKind { node_id: String, kind: String },

  #[error("invalid predicate expression '{expression}': {message}")]
  InvalidPredicate { expression: String, message: String },
}
