//! Shared task registry.
//!
//! Every agent of a lifecycle manager records its tasks in one directory so
//! that dependencies, waits and cancellation work across pools. Each record
//! publishes its state through a `watch` channel; waiters are woken exactly
//! when the state changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::types::{TaskContext, TaskOutcome, TaskState};

pub(crate) struct TaskRecord {
  context: Mutex<TaskContext>,
  state: watch::Sender<TaskState>,
  cancel: CancellationToken,
}

impl TaskRecord {
  fn new(context: TaskContext) -> Self {
    let (state, _) = watch::channel(context.state);
    Self {
      context: Mutex::new(context),
      state,
      cancel: CancellationToken::new(),
    }
  }

  pub(crate) fn snapshot(&self) -> TaskContext {
    self.context.lock().clone()
  }

  pub(crate) fn state(&self) -> TaskState {
    *self.state.borrow()
  }

  pub(crate) fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Created -> Queued.
  pub(crate) fn mark_queued(&self) -> bool {
    let mut context = self.context.lock();
    if context.state != TaskState::Created {
      return false;
    }
    context.state = TaskState::Queued;
    self.state.send_replace(TaskState::Queued);
    true
  }

  /// Queued -> Running. Returns the task input, or `None` if the task already
  /// left the queue (cancelled in place).
  pub(crate) fn mark_running(&self) -> Option<Value> {
    let mut context = self.context.lock();
    if context.state != TaskState::Queued {
      return None;
    }
    context.state = TaskState::Running;
    context.started_at = Some(Utc::now());
    self.state.send_replace(TaskState::Running);
    Some(context.input.clone())
  }

  /// Move to a terminal state. Terminal states are immutable, so this is a
  /// no-op (returning `false`) once one has been reached.
  pub(crate) fn finish(&self, state: TaskState, outcome: TaskOutcome) -> bool {
    let mut context = self.context.lock();
    if context.state.is_terminal() {
      return false;
    }
    context.state = state;
    context.error = outcome.error.clone();
    context.result = Some(outcome);
    context.completed_at = Some(Utc::now());
    self.state.send_replace(state);
    true
  }

  pub(crate) fn outcome(&self) -> Option<TaskOutcome> {
    self.context.lock().result.clone()
  }

  /// Resolves once the task reaches a terminal state.
  pub(crate) async fn terminal(&self) -> TaskState {
    let mut rx = self.state.subscribe();
    match rx.wait_for(TaskState::is_terminal).await {
      Ok(state) => *state,
      Err(_) => self.state(),
    }
  }
}

/// Registry of every task submitted through one lifecycle manager.
#[derive(Default)]
pub struct TaskDirectory {
  tasks: RwLock<HashMap<String, Arc<TaskRecord>>>,
}

impl TaskDirectory {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn insert(&self, context: TaskContext) -> Arc<TaskRecord> {
    let id = context.id.clone();
    let record = Arc::new(TaskRecord::new(context));
    self.tasks.write().insert(id, record.clone());
    record
  }

  pub(crate) fn get(&self, task_id: &str) -> Option<Arc<TaskRecord>> {
    self.tasks.read().get(task_id).cloned()
  }

  pub fn contains(&self, task_id: &str) -> bool {
    self.tasks.read().contains_key(task_id)
  }

  pub fn len(&self) -> usize {
    self.tasks.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.read().is_empty()
  }

  /// Snapshot of a task's context.
  pub fn context(&self, task_id: &str) -> Option<TaskContext> {
    self.get(task_id).map(|record| record.snapshot())
  }

  /// Outcome of a finished task; `None` while it is still pending.
  pub fn result(&self, task_id: &str) -> Option<TaskOutcome> {
    self.get(task_id).and_then(|record| record.outcome())
  }

  /// Non-terminal tasks owned by `agent_id`.
  pub(crate) fn active_for_agent(&self, agent_id: &str) -> Vec<Arc<TaskRecord>> {
    self
      .tasks
      .read()
      .values()
      .filter(|record| !record.state().is_terminal())
      .filter(|record| record.context.lock().agent_id == agent_id)
      .cloned()
      .collect()
  }

  /// Drop finished tasks from the directory.
  ///
  /// Records are never dropped automatically; the owner decides when results
  /// are no longer needed. A purged id can no longer be waited on or named as
  /// a dependency.
  pub fn purge_terminal(&self) -> usize {
    let mut tasks = self.tasks.write();
    let before = tasks.len();
    tasks.retain(|_, record| !record.state().is_terminal());
    before - tasks.len()
  }

  /// Wait until every dependency finishes. Returns the first dependency that
  /// did not complete successfully, with its final state.
  pub(crate) async fn await_dependencies(
    &self,
    dependencies: &[String],
  ) -> Result<(), (String, TaskState)> {
    for dependency in dependencies {
      let Some(record) = self.get(dependency) else {
        return Err((dependency.clone(), TaskState::Failed));
      };
      let state = record.terminal().await;
      if state != TaskState::Completed {
        return Err((dependency.clone(), state));
      }
    }
    Ok(())
  }

  /// Wait for a task to finish.
  ///
  /// Completed and failed tasks return their outcome (callers read
  /// `success`). A timeout returns [`TaskError::NotReady`] and leaves the task
  /// running.
  pub async fn wait_for_task(
    &self,
    task_id: &str,
    timeout: Option<Duration>,
  ) -> Result<TaskOutcome, TaskError> {
    let record = self
      .get(task_id)
      .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;

    let state = match timeout {
      Some(limit) => tokio::time::timeout(limit, record.terminal())
        .await
        .map_err(|_| TaskError::NotReady {
          task_id: task_id.to_string(),
        })?,
      None => record.terminal().await,
    };

    match state {
      TaskState::Cancelled => Err(TaskError::Cancelled {
        task_id: task_id.to_string(),
      }),
      _ => Ok(
        record
          .outcome()
          .unwrap_or_else(|| TaskOutcome::failed(format!("task ended {state} without a result"))),
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TaskPriority;
  use serde_json::json;

  fn context(id: &str) -> TaskContext {
    TaskContext {
      id: id.to_string(),
      capability: "echo".to_string(),
      agent_id: "echo-agent-0".to_string(),
      state: TaskState::Created,
      priority: TaskPriority::Normal,
      dependencies: Vec::new(),
      input: json!({ "n": 1 }),
      result: None,
      error: None,
      metadata: HashMap::new(),
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  #[test]
  fn test_state_transitions() {
    let directory = TaskDirectory::new();
    let record = directory.insert(context("t1"));

    assert!(record.mark_running().is_none());
    assert!(record.mark_queued());
    assert_eq!(record.mark_running(), Some(json!({ "n": 1 })));
    assert!(record.finish(TaskState::Completed, TaskOutcome::ok(json!(2))));

    // Terminal states are immutable
    assert!(!record.finish(TaskState::Failed, TaskOutcome::failed("late")));
    let snapshot = directory.context("t1").unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.completed_at.is_some());
    assert_eq!(directory.result("t1").unwrap().data, json!(2));
  }

  #[tokio::test]
  async fn test_wait_timeout_is_not_ready() {
    let directory = TaskDirectory::new();
    directory.insert(context("t1"));

    let result = directory
      .wait_for_task("t1", Some(Duration::from_millis(10)))
      .await;
    assert_eq!(
      result,
      Err(TaskError::NotReady {
        task_id: "t1".to_string()
      })
    );
  }

  #[tokio::test]
  async fn test_wait_cancelled_and_missing() {
    let directory = TaskDirectory::new();
    let record = directory.insert(context("t1"));
    record.finish(TaskState::Cancelled, TaskOutcome::failed("cancelled"));

    assert!(matches!(
      directory.wait_for_task("t1", None).await,
      Err(TaskError::Cancelled { .. })
    ));
    assert!(matches!(
      directory.wait_for_task("nope", None).await,
      Err(TaskError::TaskNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_dependency_failure_reported() {
    let directory = TaskDirectory::new();
    let ok = directory.insert(context("ok"));
    let bad = directory.insert(context("bad"));
    ok.finish(TaskState::Completed, TaskOutcome::ok(json!(null)));
    bad.finish(TaskState::Failed, TaskOutcome::failed("boom"));

    let deps = vec!["ok".to_string(), "bad".to_string()];
    assert_eq!(
      directory.await_dependencies(&deps).await,
      Err(("bad".to_string(), TaskState::Failed))
    );
  }

  #[test]
  fn test_purge_terminal() {
    let directory = TaskDirectory::new();
    let done = directory.insert(context("done"));
    directory.insert(context("pending"));
    done.finish(TaskState::Completed, TaskOutcome::ok(json!(null)));

    assert_eq!(directory.purge_terminal(), 1);
    assert!(directory.contains("pending"));
    assert_eq!(directory.len(), 1);
  }
}
