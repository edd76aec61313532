//! Capability registry and the submit/await entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use braid_config::LifecycleSettings;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::directory::TaskDirectory;
use crate::error::TaskError;
use crate::executor::TaskExecutor;
use crate::monitor::{MonitoringSink, NoopMonitor};
use crate::pool::AgentPool;
use crate::types::{TaskContext, TaskOutcome, TaskPriority};

/// One step of a multi-step submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
  pub capability: String,
  #[serde(default)]
  pub input: Value,
  #[serde(default)]
  pub priority: TaskPriority,
  /// Indices of earlier steps that must complete first.
  #[serde(default)]
  pub depends_on: Vec<usize>,
}

/// Registry of capability name to agent pool.
pub struct TaskLifecycleManager {
  settings: LifecycleSettings,
  pools: RwLock<HashMap<String, Arc<AgentPool>>>,
  directory: Arc<TaskDirectory>,
  monitor: Arc<dyn MonitoringSink>,
}

impl TaskLifecycleManager {
  pub fn new(settings: LifecycleSettings) -> Self {
    Self::with_monitor(settings, Arc::new(NoopMonitor))
  }

  pub fn with_monitor(settings: LifecycleSettings, monitor: Arc<dyn MonitoringSink>) -> Self {
    Self {
      settings,
      pools: RwLock::new(HashMap::new()),
      directory: Arc::new(TaskDirectory::new()),
      monitor,
    }
  }

  pub fn directory(&self) -> &Arc<TaskDirectory> {
    &self.directory
  }

  /// Register a capability with the configured number of agents.
  pub fn register_capability(
    &self,
    name: impl Into<String>,
    executor: Arc<dyn TaskExecutor>,
  ) -> Result<(), TaskError> {
    self.register_capability_with(name, executor, self.settings.agents_per_capability)
  }

  pub fn register_capability_with(
    &self,
    name: impl Into<String>,
    executor: Arc<dyn TaskExecutor>,
    num_agents: usize,
  ) -> Result<(), TaskError> {
    let name = name.into();
    let mut pools = self.pools.write();
    if pools.contains_key(&name) {
      return Err(TaskError::DuplicateCapability(name));
    }

    let pool = AgentPool::new(
      name.clone(),
      executor,
      num_agents,
      self.settings.max_concurrent_tasks,
      self.monitor.clone(),
      self.directory.clone(),
    );
    info!(
      capability = %name,
      agents = pool.agents().len(),
      max_concurrent_tasks = self.settings.max_concurrent_tasks,
      "capability registered"
    );
    pools.insert(name, Arc::new(pool));
    Ok(())
  }

  /// Remove a capability, shutting its pool down.
  pub fn unregister_capability(&self, name: &str) -> Result<(), TaskError> {
    let pool = self
      .pools
      .write()
      .remove(name)
      .ok_or_else(|| TaskError::CapabilityNotFound(name.to_string()))?;
    pool.shutdown();
    info!(capability = %name, "capability unregistered");
    Ok(())
  }

  pub fn has_capability(&self, name: &str) -> bool {
    self.pools.read().contains_key(name)
  }

  pub fn capabilities(&self) -> Vec<String> {
    let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
    names.sort();
    names
  }

  pub fn pool(&self, name: &str) -> Option<Arc<AgentPool>> {
    self.pools.read().get(name).cloned()
  }

  pub fn submit_task(
    &self,
    capability: &str,
    input: Value,
    priority: TaskPriority,
    dependencies: Vec<String>,
    metadata: HashMap<String, Value>,
  ) -> Result<String, TaskError> {
    let pool = self
      .pool(capability)
      .ok_or_else(|| TaskError::CapabilityNotFound(capability.to_string()))?;
    pool.submit(input, priority, dependencies, metadata)
  }

  pub async fn wait_for_task(
    &self,
    task_id: &str,
    timeout: Option<Duration>,
  ) -> Result<TaskOutcome, TaskError> {
    self.directory.wait_for_task(task_id, timeout).await
  }

  /// Submit a task and wait for its outcome.
  #[instrument(name = "execute_task", skip(self, input), fields(capability = %capability))]
  pub async fn execute_task(
    &self,
    capability: &str,
    input: Value,
    priority: TaskPriority,
  ) -> Result<TaskOutcome, TaskError> {
    let task_id = self.submit_task(capability, input, priority, Vec::new(), HashMap::new())?;
    self.wait_for_task(&task_id, None).await
  }

  /// Like [`execute_task`](Self::execute_task), cancelling the task when
  /// `cancel` fires.
  pub async fn execute_task_with_cancel(
    &self,
    capability: &str,
    input: Value,
    priority: TaskPriority,
    cancel: CancellationToken,
  ) -> Result<TaskOutcome, TaskError> {
    let task_id = self.submit_task(capability, input, priority, Vec::new(), HashMap::new())?;

    tokio::select! {
      result = self.wait_for_task(&task_id, None) => result,
      _ = cancel.cancelled() => {
        self.cancel_task(&task_id)?;
        // Running tasks are marked cancelled once their executor returns
        self.wait_for_task(&task_id, None).await
      }
    }
  }

  pub fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError> {
    let context = self
      .directory
      .context(task_id)
      .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
    let pool = self
      .pool(&context.capability)
      .ok_or_else(|| TaskError::CapabilityNotFound(context.capability.clone()))?;
    pool.cancel_task(task_id)
  }

  pub fn get_task_context(&self, task_id: &str) -> Option<TaskContext> {
    self.directory.context(task_id)
  }

  pub fn get_task_result(&self, task_id: &str) -> Option<TaskOutcome> {
    self.directory.result(task_id)
  }

  /// Submit a batch of steps with their dependencies and wait for all of
  /// them. Outcomes are returned in step order.
  ///
  /// A step that cannot be submitted (unknown capability, invalid dependency
  /// index) gets a failed outcome; the other steps still run, and steps
  /// depending on it fail.
  pub async fn execute_steps(&self, steps: Vec<TaskStep>) -> Vec<TaskOutcome> {
    let mut submitted: Vec<Result<String, String>> = Vec::with_capacity(steps.len());

    for (index, step) in steps.into_iter().enumerate() {
      let dependencies: Result<Vec<String>, String> = step
        .depends_on
        .iter()
        .map(|dep| match submitted.get(*dep) {
          Some(Ok(task_id)) if *dep < index => Ok(task_id.clone()),
          Some(Err(_)) => Err(format!("dependency step {dep} was not submitted")),
          _ => Err(format!("invalid dependency step {dep}")),
        })
        .collect();

      let result = dependencies.and_then(|dependencies| {
        let mut metadata = HashMap::new();
        metadata.insert("step".to_string(), Value::from(index));
        self
          .submit_task(&step.capability, step.input, step.priority, dependencies, metadata)
          .map_err(|e| e.to_string())
      });

      if let Err(e) = &result {
        warn!(step = index, capability = %step.capability, error = %e, "step not submitted");
      }
      submitted.push(result);
    }

    let waits = submitted.iter().map(|entry| async move {
      match entry {
        Ok(task_id) => match self.wait_for_task(task_id, None).await {
          Ok(outcome) => outcome,
          Err(e) => TaskOutcome::failed(e.to_string()),
        },
        Err(message) => TaskOutcome::failed(message.clone()),
      }
    });
    join_all(waits).await
  }

  /// Forget finished tasks across every pool. See
  /// [`TaskDirectory::purge_terminal`].
  pub fn purge_finished(&self) -> usize {
    let purged = self.directory.purge_terminal();
    if purged > 0 {
      debug!(purged, "finished tasks purged");
    }
    purged
  }

  /// Shut every pool down. Registered capabilities stay listed but accept no
  /// new work.
  pub fn shutdown(&self) {
    let pools: Vec<Arc<AgentPool>> = self.pools.read().values().cloned().collect();
    for pool in pools {
      pool.shutdown();
    }
    info!("task lifecycle manager shut down");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TaskExecutionError;
  use crate::executor::executor_fn;
  use serde_json::json;

  fn echo() -> Arc<dyn TaskExecutor> {
    executor_fn(|input, _cancel| async move { Ok(TaskOutcome::ok(input)) })
  }

  #[tokio::test]
  async fn test_purge_finished() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();
    let done = manager
      .submit_task("echo", json!(1), TaskPriority::Normal, vec![], HashMap::new())
      .unwrap();
    manager.wait_for_task(&done, None).await.unwrap();

    assert_eq!(manager.purge_finished(), 1);
    assert!(manager.get_task_context(&done).is_none());
    assert_eq!(
      manager.wait_for_task(&done, None).await,
      Err(TaskError::TaskNotFound(done.clone()))
    );
    assert_eq!(
      manager.submit_task("echo", json!(2), TaskPriority::Normal, vec![done.clone()], HashMap::new()),
      Err(TaskError::UnknownDependency { dependency: done })
    );
  }

  #[tokio::test]
  async fn test_duplicate_capability() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();
    assert_eq!(
      manager.register_capability("echo", echo()),
      Err(TaskError::DuplicateCapability("echo".to_string()))
    );
    assert_eq!(manager.pool("echo").unwrap().agents().len(), 3);
  }

  #[tokio::test]
  async fn test_execute_task_unknown_capability() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    let result = manager
      .execute_task("missing", json!(null), TaskPriority::Normal)
      .await;
    assert_eq!(
      result,
      Err(TaskError::CapabilityNotFound("missing".to_string()))
    );
  }

  #[tokio::test]
  async fn test_execute_task_roundtrip() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();

    let outcome = manager
      .execute_task("echo", json!({ "q": "rust" }), TaskPriority::High)
      .await
      .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.data, json!({ "q": "rust" }));
  }

  #[tokio::test]
  async fn test_cross_pool_dependency() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();
    manager
      .register_capability(
        "upper",
        executor_fn(|input: Value, _cancel| async move {
          let text = input["text"].as_str().ok_or(TaskExecutionError::InvalidInput {
            message: "text required".to_string(),
          })?;
          Ok::<_, TaskExecutionError>(TaskOutcome::ok(json!(text.to_uppercase())))
        }),
      )
      .unwrap();

    let first = manager
      .submit_task("echo", json!(1), TaskPriority::Normal, vec![], HashMap::new())
      .unwrap();
    let second = manager
      .submit_task(
        "upper",
        json!({ "text": "done" }),
        TaskPriority::Normal,
        vec![first.clone()],
        HashMap::new(),
      )
      .unwrap();

    let outcome = manager.wait_for_task(&second, None).await.unwrap();
    assert_eq!(outcome.data, json!("DONE"));

    let dep = manager.get_task_context(&first).unwrap();
    let task = manager.get_task_context(&second).unwrap();
    assert!(task.started_at.unwrap() > dep.completed_at.unwrap());
  }

  #[tokio::test]
  async fn test_execute_steps() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();

    let steps = vec![
      TaskStep {
        capability: "echo".to_string(),
        input: json!("a"),
        priority: TaskPriority::Normal,
        depends_on: vec![],
      },
      TaskStep {
        capability: "missing".to_string(),
        input: json!("b"),
        priority: TaskPriority::Normal,
        depends_on: vec![],
      },
      TaskStep {
        capability: "echo".to_string(),
        input: json!("c"),
        priority: TaskPriority::Normal,
        depends_on: vec![0],
      },
      TaskStep {
        capability: "echo".to_string(),
        input: json!("d"),
        priority: TaskPriority::Normal,
        depends_on: vec![1],
      },
    ];

    let outcomes = manager.execute_steps(steps).await;
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].data, json!("a"));
    assert!(!outcomes[1].success);
    assert!(outcomes[1].error.as_deref().unwrap().contains("missing"));
    assert_eq!(outcomes[2].data, json!("c"));
    assert!(!outcomes[3].success);
  }

  #[tokio::test]
  async fn test_unregister_capability() {
    let manager = TaskLifecycleManager::new(LifecycleSettings::default());
    manager.register_capability("echo", echo()).unwrap();
    manager.unregister_capability("echo").unwrap();
    assert!(!manager.has_capability("echo"));
    assert_eq!(
      manager.unregister_capability("echo"),
      Err(TaskError::CapabilityNotFound("echo".to_string()))
    );
  }
}
