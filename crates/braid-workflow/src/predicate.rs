//! Boolean predicates over JSON values.
//!
//! Predicates guard edges (evaluated against the source node's output) and
//! drive decision nodes (evaluated against the instance context). They are
//! either native closures or minijinja expressions:
//!
//! ```text
//! output.score > 0.5
//! status == "approved" and not value.retry
//! ```
//!
//! An expression sees the evaluated value as `value` (alias `output`) and, when
//! the value is an object, each of its top-level fields.

use std::fmt;
use std::sync::{Arc, LazyLock};

use minijinja::Environment;
use serde_json::Value;
use tracing::warn;

use crate::error::WorkflowError;

type PredicateFn = dyn Fn(&Value) -> bool + Send + Sync;

/// Compiled expressions borrow their environment, so all of them share one.
static EXPRESSIONS: LazyLock<Environment<'static>> = LazyLock::new(Environment::new);

/// A shareable boolean function of a JSON value.
#[derive(Clone)]
pub struct Predicate {
  inner: Arc<PredicateFn>,
  expression: Option<String>,
}

impl Predicate {
  /// Wrap a native closure.
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
  {
    Self {
      inner: Arc::new(f),
      expression: None,
    }
  }

  /// Compile a minijinja expression.
  ///
  /// Syntax errors are reported here; the compiled expression is reused for
  /// every evaluation. Evaluation errors at runtime (e.g. comparing
  /// incompatible types) evaluate to `false`.
  pub fn expression(source: impl Into<String>) -> Result<Self, WorkflowError> {
    let source = source.into();
    let compiled = EXPRESSIONS
      .compile_expression_owned(source.clone())
      .map_err(|e| WorkflowError::InvalidPredicate {
        expression: source.clone(),
        message: e.to_string(),
      })?;

    let expr = source.clone();
    let inner = move |value: &Value| match compiled.eval(expression_scope(value)) {
      Ok(result) => result.is_true(),
      Err(e) => {
        warn!(expression = %expr, error = %e, "predicate evaluation failed");
        false
      }
    };

    Ok(Self {
      inner: Arc::new(inner),
      expression: Some(source),
    })
  }

  /// Matches values equal to `expected`.
  pub fn equals(expected: Value) -> Self {
    Self::new(move |value| *value == expected)
  }

  /// Matches the boolean `true` (a decision node that took its "yes" branch).
  pub fn is_true() -> Self {
    Self::equals(Value::Bool(true))
  }

  /// Matches the boolean `false`.
  pub fn is_false() -> Self {
    Self::equals(Value::Bool(false))
  }

  pub fn evaluate(&self, value: &Value) -> bool {
    (self.inner)(value)
  }

  /// Source text for expression predicates.
  pub fn expression_source(&self) -> Option<&str> {
    self.expression.as_deref()
  }
}

impl fmt::Debug for Predicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.expression {
      Some(expr) => f.debug_tuple("Predicate").field(expr).finish(),
      None => f.write_str("Predicate(<fn>)"),
    }
  }
}

fn expression_scope(value: &Value) -> serde_json::Map<String, Value> {
  let mut scope = value.as_object().cloned().unwrap_or_default();
  scope
    .entry("value".to_string())
    .or_insert_with(|| value.clone());
  scope
    .entry("output".to_string())
    .or_insert_with(|| value.clone());
  scope
}
