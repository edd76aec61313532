use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
  pub from: String,
  pub to: String,
  /// Expression evaluated against the source node's output (e.g. `output.score > 5`).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub label: String,
}
