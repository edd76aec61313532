//! The worker transport contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use braid_task::{TaskExecutor, TaskOutcome};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::TransportError;
use crate::types::{DistributedTask, TaskCompletion, WorkerInfo};

/// Hands a task to a worker.
///
/// `dispatch` only acknowledges delivery. The outcome arrives later through
/// the scheduler's completion channel (or [`complete_task`]). Any RPC or queue
/// mechanism can implement this.
///
/// [`complete_task`]: crate::DistributedTaskScheduler::complete_task
#[async_trait]
pub trait WorkerTransport: Send + Sync {
  async fn dispatch(
    &self,
    task: &DistributedTask,
    worker: &WorkerInfo,
  ) -> Result<(), TransportError>;
}

/// Runs dispatched tasks in-process with the executor registered for their
/// capability and reports completions on a channel.
///
/// Register the workers it serves through [`LocalWorker`](crate::LocalWorker)
/// so they keep heartbeating while idle.
pub struct LocalTransport {
  executors: HashMap<String, Arc<dyn TaskExecutor>>,
  completions: mpsc::UnboundedSender<TaskCompletion>,
}

impl LocalTransport {
  pub fn new(completions: mpsc::UnboundedSender<TaskCompletion>) -> Self {
    Self {
      executors: HashMap::new(),
      completions,
    }
  }

  pub fn with_executor(
    mut self,
    capability: impl Into<String>,
    executor: Arc<dyn TaskExecutor>,
  ) -> Self {
    self.executors.insert(capability.into(), executor);
    self
  }
}

#[async_trait]
impl WorkerTransport for LocalTransport {
  async fn dispatch(
    &self,
    task: &DistributedTask,
    worker: &WorkerInfo,
  ) -> Result<(), TransportError> {
    let executor = self
      .executors
      .get(&task.capability)
      .cloned()
      .ok_or_else(|| TransportError::Rejected {
        worker_id: worker.id.clone(),
        message: format!("no executor for capability '{}'", task.capability),
      })?;

    let task_id = task.id.clone();
    let input = task.input.clone();
    let completions = self.completions.clone();
    debug!(task_id = %task_id, worker_id = %worker.id, "dispatching locally");

    tokio::spawn(async move {
      // Inner task so a panicking executor still reports a completion
      let run = tokio::spawn(async move { executor.execute(input, CancellationToken::new()).await });
      let outcome = match run.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => TaskOutcome::failed(e.to_string()),
        Err(e) => {
          error!(task_id = %task_id, error = %e, "executor panicked");
          TaskOutcome::failed(format!("executor panicked: {e}"))
        }
      };
      if completions.send(TaskCompletion { task_id, outcome }).is_err() {
        warn!("completion channel closed");
      }
    });
    Ok(())
  }
}
