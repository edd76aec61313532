use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use crate::agent::SingleAgent;
use crate::directory::TaskDirectory;
use crate::error::TaskError;
use crate::executor::TaskExecutor;
use crate::monitor::MonitoringSink;
use crate::types::{TaskContext, TaskOutcome, TaskPriority};

/// A fixed set of agents sharing one capability and executor.
///
/// Submissions are distributed round robin without regard to load, so
/// priority ordering only holds within each agent's own queue.
pub struct AgentPool {
  capability: String,
  agents: Vec<SingleAgent>,
  next: AtomicUsize,
  directory: Arc<TaskDirectory>,
}

impl AgentPool {
  pub fn new(
    capability: impl Into<String>,
    executor: Arc<dyn TaskExecutor>,
    num_agents: usize,
    max_concurrent_tasks: usize,
    monitor: Arc<dyn MonitoringSink>,
    directory: Arc<TaskDirectory>,
  ) -> Self {
    let capability = capability.into();
    let agents = (0..num_agents.max(1))
      .map(|index| {
        SingleAgent::new(
          format!("{capability}-agent-{index}"),
          capability.clone(),
          executor.clone(),
          max_concurrent_tasks,
          monitor.clone(),
          directory.clone(),
        )
      })
      .collect();

    Self {
      capability,
      agents,
      next: AtomicUsize::new(0),
      directory,
    }
  }

  pub fn capability(&self) -> &str {
    &self.capability
  }

  pub fn agents(&self) -> &[SingleAgent] {
    &self.agents
  }

  /// Submit to the next agent in round-robin order.
  pub fn submit(
    &self,
    input: Value,
    priority: TaskPriority,
    dependencies: Vec<String>,
    metadata: HashMap<String, Value>,
  ) -> Result<String, TaskError> {
    let index = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
    self.agents[index].submit(input, priority, dependencies, metadata)
  }

  /// The agent that owns `task_id`, if it belongs to this pool.
  pub fn agent_for(&self, task_id: &str) -> Option<&SingleAgent> {
    let context = self.directory.context(task_id)?;
    self.agents.iter().find(|agent| agent.id() == context.agent_id)
  }

  pub fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError> {
    self
      .agent_for(task_id)
      .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?
      .cancel_task(task_id)
  }

  pub fn get_task_context(&self, task_id: &str) -> Option<TaskContext> {
    self.agent_for(task_id)?.get_task_context(task_id)
  }

  pub fn get_task_result(&self, task_id: &str) -> Option<TaskOutcome> {
    self.agent_for(task_id)?.get_task_result(task_id)
  }

  pub fn shutdown(&self) {
    for agent in &self.agents {
      agent.shutdown();
    }
  }
}
