use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub node_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeType {
  /// A unit of work dispatched to the executor registered for `capability`.
  Task {
    capability: String,
    /// Static input spec. String values may contain templates that are
    /// rendered against the instance context and prior node outputs.
    #[serde(default)]
    input: serde_json::Value,
    /// Record a failed outcome as output instead of failing the workflow.
    #[serde(default)]
    continue_on_failure: bool,
  },
  /// Evaluates `condition` against the instance context; the boolean result
  /// becomes the node output. A missing condition evaluates to `true`.
  Decision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
  },
  Join,
  Fork,
  Merge,
}
