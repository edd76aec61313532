use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
  Created,
  Running,
  Paused,
  Completed,
  Failed,
  Cancelled,
}

impl InstanceState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      InstanceState::Completed | InstanceState::Failed | InstanceState::Cancelled
    )
  }
}

impl fmt::Display for InstanceState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      InstanceState::Created => "created",
      InstanceState::Running => "running",
      InstanceState::Paused => "paused",
      InstanceState::Completed => "completed",
      InstanceState::Failed => "failed",
      InstanceState::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// One execution of a workflow definition.
///
/// A node id is never in `current_nodes` and `completed_nodes` at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
  pub id: String,
  pub workflow_id: String,
  pub state: InstanceState,
  /// Nodes activated but not yet executed, in activation order.
  pub current_nodes: Vec<String>,
  /// Executed nodes, in completion order.
  pub completed_nodes: Vec<String>,
  pub node_outputs: BTreeMap<String, Value>,
  pub context: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub metadata: HashMap<String, Value>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
  pub(crate) fn new(workflow_id: &str, start_node: &str, context: Map<String, Value>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      workflow_id: workflow_id.to_string(),
      state: InstanceState::Created,
      current_nodes: vec![start_node.to_string()],
      completed_nodes: Vec::new(),
      node_outputs: BTreeMap::new(),
      context,
      error: None,
      metadata: HashMap::new(),
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn is_completed(&self, node_id: &str) -> bool {
    self.completed_nodes.iter().any(|id| id == node_id)
  }

  pub fn is_current(&self, node_id: &str) -> bool {
    self.current_nodes.iter().any(|id| id == node_id)
  }

  /// Move a node from current to completed and record its output.
  pub(crate) fn complete_node(&mut self, node_id: &str, output: Value) {
    self.current_nodes.retain(|id| id != node_id);
    if !self.is_completed(node_id) {
      self.completed_nodes.push(node_id.to_string());
    }
    self.node_outputs.insert(node_id.to_string(), output);
  }

  /// Activate a node unless it is already current or completed.
  pub(crate) fn activate(&mut self, node_id: String) {
    if !self.is_current(&node_id) && !self.is_completed(&node_id) {
      self.current_nodes.push(node_id);
    }
  }

  pub(crate) fn mark_running(&mut self) {
    self.state = InstanceState::Running;
    self.started_at.get_or_insert_with(Utc::now);
  }

  /// Enter a terminal state.
  pub(crate) fn finish(&mut self, state: InstanceState, error: Option<String>) {
    self.state = state;
    self.error = error;
    self.completed_at = Some(Utc::now());
  }
}
