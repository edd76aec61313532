use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::predicate::Predicate;

/// Kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  /// Dispatched to the executor registered for the node's capability.
  Task,
  /// Evaluates its predicate against the instance context.
  Decision,
  /// Waits for every parent node before passing through.
  Join,
  /// Pass-through marker that fans out to its targets.
  Fork,
  /// Pass-through marker that continues on first arrival.
  Merge,
}

impl NodeKind {
  /// Fork, join and merge nodes perform no work of their own.
  pub fn is_control_flow(&self) -> bool {
    matches!(self, NodeKind::Join | NodeKind::Fork | NodeKind::Merge)
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeKind::Task => write!(f, "task"),
      NodeKind::Decision => write!(f, "decision"),
      NodeKind::Join => write!(f, "join"),
      NodeKind::Fork => write!(f, "fork"),
      NodeKind::Merge => write!(f, "merge"),
    }
  }
}

/// A node in the workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowNode {
  pub id: String,
  pub name: String,
  pub kind: NodeKind,
  /// Executor capability (task nodes only).
  pub capability: Option<String>,
  /// Static input spec, rendered into the concrete task input at dispatch time.
  pub input: Value,
  /// Decision predicate (decision nodes only). `None` evaluates to `true`.
  pub predicate: Option<Predicate>,
  /// Record a failed task outcome as the node output instead of failing the instance.
  pub continue_on_failure: bool,
  /// Indices into the definition's edge list.
  pub outgoing: Vec<usize>,
  pub incoming: Vec<usize>,
}

impl WorkflowNode {
  fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      kind,
      capability: None,
      input: Value::Null,
      predicate: None,
      continue_on_failure: false,
      outgoing: Vec::new(),
      incoming: Vec::new(),
    }
  }

  pub fn task(
    id: impl Into<String>,
    name: impl Into<String>,
    capability: impl Into<String>,
    input: Value,
  ) -> Self {
    let mut node = Self::new(id, name, NodeKind::Task);
    node.capability = Some(capability.into());
    node.input = input;
    node
  }

  pub fn decision(id: impl Into<String>, name: impl Into<String>, predicate: Predicate) -> Self {
    let mut node = Self::new(id, name, NodeKind::Decision);
    node.predicate = Some(predicate);
    node
  }

  /// A fork, join or merge node.
  pub fn control_flow(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
    Self::new(id, name, kind)
  }
}

/// An edge connecting two nodes in the workflow.
#[derive(Debug, Clone)]
pub struct WorkflowEdge {
  pub source: String,
  pub target: String,
  /// Evaluated against the source node's output; `None` always passes.
  pub predicate: Option<Predicate>,
  pub label: String,
}

impl WorkflowEdge {
  pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
      predicate: None,
      label: String::new(),
    }
  }

  pub fn with_predicate(mut self, predicate: Predicate) -> Self {
    self.predicate = Some(predicate);
    self
  }

  pub fn with_label(mut self, label: impl Into<String>) -> Self {
    self.label = label.into();
    self
  }

  /// Whether this edge is traversed for the given source output.
  pub fn accepts(&self, output: &Value) -> bool {
    self
      .predicate
      .as_ref()
      .is_none_or(|predicate| predicate.evaluate(output))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_edge_without_predicate_accepts_everything() {
    let edge = WorkflowEdge::new("a", "b");
    assert!(edge.accepts(&json!(null)));
    assert!(edge.accepts(&json!(false)));
  }

  #[test]
  fn test_edge_with_predicate() {
    let edge = WorkflowEdge::new("check", "yes")
      .with_predicate(Predicate::is_true())
      .with_label("approved");
    assert!(edge.accepts(&json!(true)));
    assert!(!edge.accepts(&json!(false)));
    assert_eq!(edge.label, "approved");
  }

  #[test]
  fn test_node_constructors() {
    let task = WorkflowNode::task("fetch", "Fetch", "http", json!({ "url": "x" }));
    assert_eq!(task.kind, NodeKind::Task);
    assert_eq!(task.capability.as_deref(), Some("http"));

    let join = WorkflowNode::control_flow("join", "Join", NodeKind::Join);
    assert!(join.kind.is_control_flow());
    assert!(join.capability.is_none());
    assert!(!NodeKind::Decision.is_control_flow());
    assert_eq!(NodeKind::Merge.to_string(), "merge");
  }
}
