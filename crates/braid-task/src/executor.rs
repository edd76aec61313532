//! The executor contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TaskExecutionError;
use crate::types::TaskOutcome;

/// Performs the work behind a capability.
///
/// Implementations should observe `cancel` at their suspension points.
/// Cancellation is cooperative: the agent only requests it, and a task whose
/// token was cancelled is recorded as cancelled whatever the executor returns.
///
/// Returning `Err` (or panicking) fails the task. Returning an outcome with
/// `success: false` fails it too but keeps the outcome's data.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
  async fn execute(
    &self,
    input: Value,
    cancel: CancellationToken,
  ) -> Result<TaskOutcome, TaskExecutionError>;
}

/// Adapts an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F> {
  f: F,
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
  F: Fn(Value, CancellationToken) -> Fut + Send + Sync,
  Fut: Future<Output = Result<TaskOutcome, TaskExecutionError>> + Send,
{
  async fn execute(
    &self,
    input: Value,
    cancel: CancellationToken,
  ) -> Result<TaskOutcome, TaskExecutionError> {
    (self.f)(input, cancel).await
  }
}

/// Shorthand for wrapping a closure as a shared executor.
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
  F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<TaskOutcome, TaskExecutionError>> + Send + 'static,
{
  Arc::new(FnExecutor { f })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_executor_fn() {
    let executor = executor_fn(|input, _cancel| async move {
      Ok(TaskOutcome::ok(json!({ "echo": input })))
    });

    let outcome = executor
      .execute(json!(1), CancellationToken::new())
      .await
      .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.data, json!({ "echo": 1 }));
  }
}
