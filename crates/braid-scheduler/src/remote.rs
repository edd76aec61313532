use std::sync::Arc;

use async_trait::async_trait;
use braid_task::{TaskExecutionError, TaskExecutor, TaskOutcome};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SchedulerError;
use crate::scheduler::DistributedTaskScheduler;

/// Runs tasks for one capability on the scheduler's workers.
///
/// Register it with a lifecycle manager to route a capability to remote
/// workers instead of an in-process executor.
pub struct RemoteExecutor {
  scheduler: Arc<DistributedTaskScheduler>,
  capability: String,
  priority: i32,
}

impl RemoteExecutor {
  pub fn new(scheduler: Arc<DistributedTaskScheduler>, capability: impl Into<String>) -> Self {
    Self {
      scheduler,
      capability: capability.into(),
      priority: 0,
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }
}

#[async_trait]
impl TaskExecutor for RemoteExecutor {
  async fn execute(
    &self,
    input: Value,
    cancel: CancellationToken,
  ) -> Result<TaskOutcome, TaskExecutionError> {
    let task_id = self
      .scheduler
      .submit_task(self.capability.clone(), input, self.priority);

    tokio::select! {
      _ = cancel.cancelled() => {
        // Only a pending task can be withdrawn; a dispatched one runs out
        let withdrawn = self.scheduler.cancel_task(&task_id).unwrap_or(false);
        debug!(task_id = %task_id, withdrawn, "remote task cancelled");
        Err(TaskExecutionError::Cancelled)
      }
      result = self.scheduler.wait_for_task(&task_id, None) => match result {
        Ok(outcome) => Ok(outcome),
        Err(SchedulerError::Cancelled { .. }) => Err(TaskExecutionError::Cancelled),
        Err(e) => Err(TaskExecutionError::Failed { message: e.to_string() }),
      },
    }
  }
}
