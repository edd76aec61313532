use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::error::ConfigError;
use crate::node::{NodeDef, NodeType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  /// Defaults to the first node when omitted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_node: Option<String>,
  #[serde(default)]
  pub end_nodes: Vec<String>,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
}

impl WorkflowDef {
  /// Load a workflow definition from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Distinct capabilities referenced by task nodes, in declaration order.
  pub fn capabilities(&self) -> Vec<String> {
    let mut capabilities: Vec<String> = Vec::new();
    for node in &self.nodes {
      if let NodeType::Task { capability, .. } = &node.node_type {
        if !capabilities.contains(capability) {
          capabilities.push(capability.clone());
        }
      }
    }
    capabilities
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample() -> serde_json::Value {
    json!({
      "workflow_id": "research",
      "name": "Research",
      "end_nodes": ["summarize"],
      "nodes": [
        { "node_id": "search", "type": "task", "capability": "research",
          "input": { "query": "{{ topic }}" } },
        { "node_id": "check", "type": "decision", "condition": "deep" },
        { "node_id": "fanout", "type": "fork" },
        { "node_id": "summarize", "type": "task", "capability": "docs",
          "continue_on_failure": true }
      ],
      "edges": [
        { "from": "search", "to": "check" },
        { "from": "check", "to": "summarize", "condition": "output", "label": "deep" }
      ]
    })
  }

  #[test]
  fn test_parse_workflow_def() {
    let def: WorkflowDef = serde_json::from_value(sample()).unwrap();

    assert_eq!(def.workflow_id, "research");
    assert_eq!(def.nodes.len(), 4);
    assert!(def.start_node.is_none());
    assert_eq!(def.edges[1].condition.as_deref(), Some("output"));
    assert_eq!(def.edges[1].label, "deep");
    assert!(matches!(
      def.nodes[1].node_type,
      NodeType::Decision { condition: Some(_) }
    ));
    assert!(matches!(def.nodes[2].node_type, NodeType::Fork));
    match &def.nodes[3].node_type {
      NodeType::Task {
        input,
        continue_on_failure,
        ..
      } => {
        assert!(input.is_null());
        assert!(*continue_on_failure);
      }
      other => panic!("unexpected node type: {:?}", other),
    }
  }

  #[test]
  fn test_capabilities_are_distinct() {
    let mut def: WorkflowDef = serde_json::from_value(sample()).unwrap();
    def.nodes.push(NodeDef {
      node_id: "again".to_string(),
      name: String::new(),
      node_type: NodeType::Task {
        capability: "research".to_string(),
        input: serde_json::Value::Null,
        continue_on_failure: false,
      },
    });

    assert_eq!(def.capabilities(), vec!["research", "docs"]);
  }

  #[test]
  fn test_load_missing_file() {
    let result = WorkflowDef::load(Path::new("/nonexistent/workflow.json"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workflow.json");
    std::fs::write(&path, sample().to_string()).unwrap();

    let def = WorkflowDef::load(&path).unwrap();
    assert_eq!(def.end_nodes, vec!["summarize"]);
  }
}
