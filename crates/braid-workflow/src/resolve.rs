use braid_config::{NodeType, WorkflowDef};

use crate::error::WorkflowError;
use crate::node::{NodeKind, WorkflowEdge, WorkflowNode};
use crate::predicate::Predicate;
use crate::workflow::WorkflowDefinition;

/// Convert a declarative workflow file into a validated definition.
///
/// Decision and edge conditions are compiled into expression predicates.
impl TryFrom<WorkflowDef> for WorkflowDefinition {
  type Error = WorkflowError;

  fn try_from(def: WorkflowDef) -> Result<Self, Self::Error> {
    let mut definition = WorkflowDefinition::new(def.workflow_id, def.name);
    definition.description = def.description;

    for node in def.nodes {
      let name = if node.name.is_empty() {
        node.node_id.clone()
      } else {
        node.name
      };

      let resolved = match node.node_type {
        NodeType::Task {
          capability,
          input,
          continue_on_failure,
        } => {
          let mut task = WorkflowNode::task(node.node_id, name, capability, input);
          task.continue_on_failure = continue_on_failure;
          task
        }
        NodeType::Decision { condition } => {
          let mut decision = WorkflowNode::control_flow(node.node_id, name, NodeKind::Decision);
          decision.predicate = condition.map(Predicate::expression).transpose()?;
          decision
        }
        NodeType::Join => WorkflowNode::control_flow(node.node_id, name, NodeKind::Join),
        NodeType::Fork => WorkflowNode::control_flow(node.node_id, name, NodeKind::Fork),
        NodeType::Merge => WorkflowNode::control_flow(node.node_id, name, NodeKind::Merge),
      };
      definition.add_node(resolved)?;
    }

    for edge in def.edges {
      let mut resolved = WorkflowEdge::new(edge.from, edge.to).with_label(edge.label);
      resolved.predicate = edge.condition.map(Predicate::expression).transpose()?;
      definition.add_edge(resolved)?;
    }

    if let Some(start) = def.start_node {
      definition.set_start_node(start)?;
    }
    definition.set_end_nodes(def.end_nodes)?;

    definition.validate()?;
    Ok(definition)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn parse(value: serde_json::Value) -> WorkflowDef {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_resolve_branching_file() {
    let def = parse(json!({
      "workflow_id": "route",
      "name": "Route",
      "end_nodes": ["high", "low"],
      "nodes": [
        { "node_id": "score", "type": "task", "capability": "scorer" },
        { "node_id": "high", "type": "task", "capability": "notify",
          "continue_on_failure": true },
        { "node_id": "low", "type": "task", "capability": "archive" }
      ],
      "edges": [
        { "from": "score", "to": "high", "condition": "output.score > 5", "label": "high" },
        { "from": "score", "to": "low", "condition": "output.score <= 5" }
      ]
    }));

    let definition = WorkflowDefinition::try_from(def).unwrap();
    assert_eq!(definition.start_node.as_deref(), Some("score"));
    assert_eq!(definition.edges[0].label, "high");
    assert!(definition.get_node("high").unwrap().continue_on_failure);
    assert_eq!(
      definition.next_nodes("score", &json!({ "score": 9 })),
      vec!["high"]
    );
    assert_eq!(
      definition.next_nodes("score", &json!({ "score": 1 })),
      vec!["low"]
    );
  }

  #[test]
  fn test_resolve_decision_and_control_flow() {
    let def = parse(json!({
      "workflow_id": "w",
      "name": "W",
      "start_node": "check",
      "end_nodes": ["done"],
      "nodes": [
        { "node_id": "done", "type": "merge" },
        { "node_id": "check", "type": "decision", "condition": "deep" }
      ],
      "edges": [{ "from": "check", "to": "done" }]
    }));

    let definition = WorkflowDefinition::try_from(def).unwrap();
    let check = definition.get_node("check").unwrap();
    assert_eq!(check.kind, NodeKind::Decision);
    assert_eq!(check.name, "check");
    let predicate = check.predicate.as_ref().unwrap();
    assert!(predicate.evaluate(&json!({ "deep": true })));
    assert_eq!(definition.get_node("done").unwrap().kind, NodeKind::Merge);
  }

  #[test]
  fn test_resolve_invalid_condition() {
    let def = parse(json!({
      "workflow_id": "w",
      "name": "W",
      "end_nodes": ["a"],
      "nodes": [{ "node_id": "a", "type": "decision", "condition": "x >" }]
    }));

    assert!(matches!(
      WorkflowDefinition::try_from(def),
      Err(WorkflowError::InvalidPredicate { .. })
    ));
  }

  #[test]
  fn test_resolve_missing_end_nodes() {
    let def = parse(json!({
      "workflow_id": "w",
      "name": "W",
      "nodes": [{ "node_id": "a", "type": "fork" }]
    }));

    assert!(matches!(
      WorkflowDefinition::try_from(def),
      Err(WorkflowError::NoEndNodes)
    ));
  }
}
