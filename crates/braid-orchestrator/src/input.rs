//! Node input rendering using minijinja templates.
//!
//! A task node's static input spec is rendered into its concrete input right
//! before dispatch. Every string in the input spec (at any depth) is a template
//! rendered against a scope built from the instance:
//!
//! - the context fields at top level (`{{ topic }}`)
//! - `context`: the whole context object
//! - `nodes`: outputs of completed nodes keyed by node id (`{{ nodes.search.hits }}`)
//! - `upstream`: outputs of this node's parents keyed by node id
//!
//! A string that consists of exactly one `{{ expression }}` keeps the type of
//! the value it evaluates to:
//!
//! ```json
//! { "results": "{{ nodes.search.hits }}", "title": "Report on {{ topic | title }}" }
//! ```
//!
//! Here `results` stays an array while `title` becomes a string. A node without
//! an input spec receives `{ "context": ..., "upstream": ... }`.

use braid_workflow::{WorkflowDefinition, WorkflowNode};
use minijinja::Environment;
use serde_json::{Map, Value, json};

use crate::error::NodeExecutionError;
use crate::instance::WorkflowInstance;

/// Produces the concrete input of a node. Must be free of side effects.
pub trait InputRenderer: Send + Sync {
  fn render(
    &self,
    definition: &WorkflowDefinition,
    node: &WorkflowNode,
    instance: &WorkflowInstance,
  ) -> Result<Value, NodeExecutionError>;
}

/// Renders input specs as minijinja templates.
pub struct TemplateRenderer {
  env: Environment<'static>,
}

impl TemplateRenderer {
  pub fn new() -> Self {
    Self {
      env: Environment::new(),
    }
  }
}

impl Default for TemplateRenderer {
  fn default() -> Self {
    Self::new()
  }
}

impl InputRenderer for TemplateRenderer {
  fn render(
    &self,
    definition: &WorkflowDefinition,
    node: &WorkflowNode,
    instance: &WorkflowInstance,
  ) -> Result<Value, NodeExecutionError> {
    let upstream: Map<String, Value> = definition
      .parents(&node.id)
      .into_iter()
      .filter_map(|parent| {
        instance
          .node_outputs
          .get(parent)
          .map(|output| (parent.to_string(), output.clone()))
      })
      .collect();

    if node.input.is_null() {
      return Ok(json!({
        "context": instance.context,
        "upstream": upstream,
      }));
    }

    let mut scope = instance.context.clone();
    scope.insert("context".to_string(), Value::Object(instance.context.clone()));
    scope.insert(
      "nodes".to_string(),
      serde_json::to_value(&instance.node_outputs).unwrap_or_default(),
    );
    scope.insert("upstream".to_string(), Value::Object(upstream));
    let scope = Value::Object(scope);

    self.render_value(&node.id, &node.input, &scope)
  }
}

impl TemplateRenderer {
  fn render_value(
    &self,
    node_id: &str,
    spec: &Value,
    scope: &Value,
  ) -> Result<Value, NodeExecutionError> {
    match spec {
      Value::String(template) => self.render_string(node_id, template, scope),
      Value::Array(items) => items
        .iter()
        .map(|item| self.render_value(node_id, item, scope))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      Value::Object(fields) => fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), self.render_value(node_id, value, scope)?)))
        .collect::<Result<Map<_, _>, NodeExecutionError>>()
        .map(Value::Object),
      other => Ok(other.clone()),
    }
  }

  fn render_string(
    &self,
    node_id: &str,
    template: &str,
    scope: &Value,
  ) -> Result<Value, NodeExecutionError> {
    let resolution_error = |e: minijinja::Error| NodeExecutionError::InputResolution {
      node_id: node_id.to_string(),
      message: format!("failed to render '{template}': {e}"),
    };

    if let Some(expression) = single_expression(template) {
      let value = self
        .env
        .compile_expression(expression)
        .and_then(|compiled| compiled.eval(scope))
        .map_err(resolution_error)?;
      // Undefined values become null rather than an empty string
      return Ok(serde_json::to_value(&value).unwrap_or(Value::Null));
    }

    if !template.contains("{{") && !template.contains("{%") {
      return Ok(Value::String(template.to_string()));
    }

    self
      .env
      .render_str(template, scope)
      .map(Value::String)
      .map_err(resolution_error)
  }
}

/// The inner expression of a template made of exactly one `{{ ... }}` block.
fn single_expression(template: &str) -> Option<&str> {
  let inner = template
    .trim()
    .strip_prefix("{{")?
    .strip_suffix("}}")?;
  if inner.contains("{{") || inner.contains("}}") {
    return None;
  }
  let inner = inner.trim_start_matches('-').trim_end_matches('-').trim();
  (!inner.is_empty()).then_some(inner)
}
