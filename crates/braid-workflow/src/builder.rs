//! Fluent construction of workflow definitions.
//!
//! ```text
//! WorkflowBuilder::create_workflow("review", "Review")
//!   .add_task("draft", "Draft", "writer", json!({ "topic": "{{ topic }}" }))
//!   .add_decision("check", "Check", Predicate::expression("approved")?)
//!   .add_task("publish", "Publish", "publisher", json!({}))
//!   .connect("draft", "check")
//!   .connect_when("check", "publish", Predicate::is_true())
//!   .set_end_nodes(["publish"])
//!   .build()?
//! ```
//!
//! Errors raised while adding nodes or edges are held until [`WorkflowBuilder::build`],
//! which reports the first one. `build` also runs full validation.

use serde_json::Value;

use crate::error::WorkflowError;
use crate::node::{NodeKind, WorkflowEdge, WorkflowNode};
use crate::predicate::Predicate;
use crate::workflow::WorkflowDefinition;

#[derive(Debug)]
pub struct WorkflowBuilder {
  definition: WorkflowDefinition,
  error: Option<WorkflowError>,
}

impl WorkflowBuilder {
  pub fn create_workflow(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      definition: WorkflowDefinition::new(id, name),
      error: None,
    }
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.definition.description = description.into();
    self
  }

  pub fn add_task(
    self,
    id: impl Into<String>,
    name: impl Into<String>,
    capability: impl Into<String>,
    input: Value,
  ) -> Self {
    self.add_node(WorkflowNode::task(id, name, capability, input))
  }

  pub fn add_decision(
    self,
    id: impl Into<String>,
    name: impl Into<String>,
    predicate: Predicate,
  ) -> Self {
    self.add_node(WorkflowNode::decision(id, name, predicate))
  }

  /// Add a fork, join or merge node.
  pub fn add_control_flow_node(
    mut self,
    id: impl Into<String>,
    name: impl Into<String>,
    kind: NodeKind,
  ) -> Self {
    if !kind.is_control_flow() {
      let node_id = id.into();
      self.record(Err(WorkflowError::InvalidNodeKind {
        node_id,
        kind: kind.to_string(),
      }));
      return self;
    }
    self.add_node(WorkflowNode::control_flow(id, name, kind))
  }

  /// Mark a previously added task node to record failures as output.
  pub fn continue_on_failure(mut self, node_id: &str) -> Self {
    match self.definition.nodes.get_mut(node_id) {
      Some(node) => node.continue_on_failure = true,
      None => self.record(Err(WorkflowError::NodeNotFound(node_id.to_string()))),
    }
    self
  }

  pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
    self.add_edge(WorkflowEdge::new(source, target))
  }

  /// Connect with an edge traversed only when `predicate` accepts the source output.
  pub fn connect_when(
    self,
    source: impl Into<String>,
    target: impl Into<String>,
    predicate: Predicate,
  ) -> Self {
    self.add_edge(WorkflowEdge::new(source, target).with_predicate(predicate))
  }

  pub fn connect_labeled(
    self,
    source: impl Into<String>,
    target: impl Into<String>,
    label: impl Into<String>,
    predicate: Option<Predicate>,
  ) -> Self {
    let mut edge = WorkflowEdge::new(source, target).with_label(label);
    edge.predicate = predicate;
    self.add_edge(edge)
  }

  pub fn set_start_node(mut self, node_id: impl Into<String>) -> Self {
    let result = self.definition.set_start_node(node_id);
    self.record(result);
    self
  }

  pub fn set_end_nodes<I, S>(mut self, node_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let result = self.definition.set_end_nodes(node_ids);
    self.record(result);
    self
  }

  /// Finish the definition, returning the first recorded error or a
  /// validation failure.
  pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
    if let Some(error) = self.error {
      return Err(error);
    }
    self.definition.validate()?;
    Ok(self.definition)
  }

  fn add_node(mut self, node: WorkflowNode) -> Self {
    let result = self.definition.add_node(node);
    self.record(result);
    self
  }

  fn add_edge(mut self, edge: WorkflowEdge) -> Self {
    let result = self.definition.add_edge(edge);
    self.record(result);
    self
  }

  fn record(&mut self, result: Result<(), WorkflowError>) {
    if let Err(error) = result {
      self.error.get_or_insert(error);
    }
  }
}
