//! A single agent: one priority queue, one concurrency semaphore.
//!
//! ```text
//! submit ──► [dependency waiter] ──► BinaryHeap<(priority, FIFO seq)>
//!                                          │
//!                     processing loop: acquire permit ─► pop ─► spawn execution
//! ```
//!
//! The processing loop is started lazily by the first submission and exits
//! when the queue is empty. A permit is acquired before popping so the
//! highest-priority entry at the moment capacity frees up is the one that runs.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::directory::{TaskDirectory, TaskRecord};
use crate::error::{TaskError, TaskExecutionError};
use crate::executor::TaskExecutor;
use crate::monitor::MonitoringSink;
use crate::types::{TaskContext, TaskOutcome, TaskPriority, TaskState};

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
  priority: TaskPriority,
  seq: Reverse<u64>,
  task_id: String,
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    (self.priority, self.seq).cmp(&(other.priority, other.seq))
  }
}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[derive(Default)]
struct AgentQueue {
  heap: BinaryHeap<QueueEntry>,
  loop_active: bool,
}

struct AgentInner {
  id: String,
  capability: String,
  executor: Arc<dyn TaskExecutor>,
  monitor: Arc<dyn MonitoringSink>,
  directory: Arc<TaskDirectory>,
  semaphore: Arc<Semaphore>,
  queue: Mutex<AgentQueue>,
  seq: AtomicU64,
  shutdown: CancellationToken,
}

/// Executes tasks of one capability with bounded concurrency.
#[derive(Clone)]
pub struct SingleAgent {
  inner: Arc<AgentInner>,
}

impl SingleAgent {
  pub fn new(
    id: impl Into<String>,
    capability: impl Into<String>,
    executor: Arc<dyn TaskExecutor>,
    max_concurrent_tasks: usize,
    monitor: Arc<dyn MonitoringSink>,
    directory: Arc<TaskDirectory>,
  ) -> Self {
    Self {
      inner: Arc::new(AgentInner {
        id: id.into(),
        capability: capability.into(),
        executor,
        monitor,
        directory,
        semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        queue: Mutex::new(AgentQueue::default()),
        seq: AtomicU64::new(0),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  pub fn id(&self) -> &str {
    &self.inner.id
  }

  pub fn capability(&self) -> &str {
    &self.inner.capability
  }

  /// Entries waiting in the queue (excluding tasks blocked on dependencies).
  pub fn queue_len(&self) -> usize {
    self.inner.queue.lock().heap.len()
  }

  /// Submit a task and return its id.
  ///
  /// Every dependency must already be known to the agent's directory. A task
  /// whose dependency fails or is cancelled fails without running.
  pub fn submit(
    &self,
    input: Value,
    priority: TaskPriority,
    dependencies: Vec<String>,
    metadata: HashMap<String, Value>,
  ) -> Result<String, TaskError> {
    let inner = &self.inner;
    if inner.shutdown.is_cancelled() {
      return Err(TaskError::ShutDown {
        agent_id: inner.id.clone(),
      });
    }
    if let Some(missing) = dependencies.iter().find(|d| !inner.directory.contains(d)) {
      return Err(TaskError::UnknownDependency {
        dependency: missing.clone(),
      });
    }

    let task_id = Uuid::new_v4().to_string();
    let record = inner.directory.insert(TaskContext {
      id: task_id.clone(),
      capability: inner.capability.clone(),
      agent_id: inner.id.clone(),
      state: TaskState::Created,
      priority,
      dependencies: dependencies.clone(),
      input,
      result: None,
      error: None,
      metadata,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    });
    record.mark_queued();

    info!(
      task_id = %task_id,
      agent_id = %inner.id,
      capability = %inner.capability,
      priority = ?priority,
      dependencies = dependencies.len(),
      "task submitted"
    );

    if dependencies.is_empty() {
      inner.enqueue(task_id.clone(), priority);
    } else {
      let waiter = inner.clone();
      let id = task_id.clone();
      tokio::spawn(async move {
        waiter.gate_on_dependencies(id, priority, record, dependencies).await;
      });
    }

    Ok(task_id)
  }

  /// Request cancellation of a task owned by this agent.
  ///
  /// A queued task is marked cancelled in place. A running task has its
  /// token cancelled and is marked cancelled once the executor returns.
  /// Returns `false` if the task had already finished.
  pub fn cancel_task(&self, task_id: &str) -> Result<bool, TaskError> {
    let record = self
      .inner
      .directory
      .get(task_id)
      .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
    Ok(cancel_record(&self.inner.id, task_id, &record))
  }

  pub async fn wait_for_task(
    &self,
    task_id: &str,
    timeout: Option<Duration>,
  ) -> Result<TaskOutcome, TaskError> {
    self.inner.directory.wait_for_task(task_id, timeout).await
  }

  pub fn get_task_context(&self, task_id: &str) -> Option<TaskContext> {
    self.inner.directory.context(task_id)
  }

  pub fn get_task_result(&self, task_id: &str) -> Option<TaskOutcome> {
    self.inner.directory.result(task_id)
  }

  /// Stop accepting work, cancel every queued task and request cancellation
  /// of running ones.
  pub fn shutdown(&self) {
    let inner = &self.inner;
    inner.shutdown.cancel();
    inner.queue.lock().heap.clear();

    let active = inner.directory.active_for_agent(&inner.id);
    for record in &active {
      let task_id = record.snapshot().id;
      cancel_record(&inner.id, &task_id, record);
    }
    info!(agent_id = %inner.id, cancelled = active.len(), "agent shut down");
  }
}

fn cancel_record(agent_id: &str, task_id: &str, record: &TaskRecord) -> bool {
  match record.state() {
    state if state.is_terminal() => false,
    TaskState::Running => {
      record.cancel_token().cancel();
      info!(task_id = %task_id, agent_id = %agent_id, "cancellation requested");
      true
    }
    _ => {
      record.cancel_token().cancel();
      // Filtered out by the processing loop when its entry is popped
      record.finish(TaskState::Cancelled, TaskOutcome::failed("task cancelled"));
      info!(task_id = %task_id, agent_id = %agent_id, "task cancelled");
      true
    }
  }
}

impl AgentInner {
  fn enqueue(self: &Arc<Self>, task_id: String, priority: TaskPriority) {
    let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
    let start_loop = {
      let mut queue = self.queue.lock();
      queue.heap.push(QueueEntry {
        priority,
        seq: Reverse(seq),
        task_id,
      });
      !std::mem::replace(&mut queue.loop_active, true)
    };

    if start_loop {
      let inner = self.clone();
      tokio::spawn(async move { inner.process().await });
    }
  }

  async fn gate_on_dependencies(
    self: Arc<Self>,
    task_id: String,
    priority: TaskPriority,
    record: Arc<TaskRecord>,
    dependencies: Vec<String>,
  ) {
    let gate = tokio::select! {
      _ = record.cancel_token().cancelled() => return,
      gate = self.directory.await_dependencies(&dependencies) => gate,
    };

    match gate {
      Ok(()) => {
        debug!(task_id = %task_id, "dependencies satisfied");
        self.enqueue(task_id, priority);
      }
      Err((dependency, state)) => {
        let message = format!("dependency {dependency} {state}");
        warn!(task_id = %task_id, dependency = %dependency, state = %state, "task blocked by dependency");
        record.finish(TaskState::Failed, TaskOutcome::failed(message));
      }
    }
  }

  async fn process(self: Arc<Self>) {
    debug!(agent_id = %self.id, "processing loop started");
    loop {
      let permit = tokio::select! {
        _ = self.shutdown.cancelled() => break,
        permit = self.semaphore.clone().acquire_owned() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
      };

      let entry = {
        let mut queue = self.queue.lock();
        match queue.heap.pop() {
          Some(entry) => entry,
          None => {
            queue.loop_active = false;
            break;
          }
        }
      };

      let Some(record) = self.directory.get(&entry.task_id) else {
        continue;
      };
      let Some(input) = record.mark_running() else {
        debug!(task_id = %entry.task_id, "skipping task that left the queue");
        continue;
      };

      let inner = self.clone();
      let span = info_span!("task_execute", task_id = %entry.task_id, agent_id = %self.id);
      tokio::spawn(
        async move { inner.execute(entry.task_id, record, input, permit).await }.instrument(span),
      );
    }

    // Shutdown exits without clearing the flag; a stopped agent accepts no work.
    debug!(agent_id = %self.id, "processing loop stopped");
  }

  async fn execute(
    self: Arc<Self>,
    task_id: String,
    record: Arc<TaskRecord>,
    input: Value,
    _permit: OwnedSemaphorePermit,
  ) {
    info!(capability = %self.capability, "task started");
    self
      .monitor
      .start_operation(&task_id, &self.id, &self.capability);

    let executor = self.executor.clone();
    let cancel = record.cancel_token().clone();
    let result = tokio::spawn(async move { executor.execute(input, cancel).await }).await;

    let (state, outcome) = if record.cancel_token().is_cancelled() {
      (TaskState::Cancelled, TaskOutcome::failed("task cancelled"))
    } else {
      match result {
        Ok(Ok(outcome)) if outcome.success => (TaskState::Completed, outcome),
        Ok(Ok(mut outcome)) => {
          outcome.error.get_or_insert_with(|| "task reported failure".to_string());
          (TaskState::Failed, outcome)
        }
        Ok(Err(TaskExecutionError::Cancelled)) => {
          (TaskState::Cancelled, TaskOutcome::failed("task cancelled"))
        }
        Ok(Err(e)) => (TaskState::Failed, TaskOutcome::failed(e.to_string())),
        Err(e) => (
          TaskState::Failed,
          TaskOutcome::failed(format!("executor panicked: {e}")),
        ),
      }
    };

    match state {
      TaskState::Completed => info!("task completed"),
      TaskState::Cancelled => info!("task cancelled"),
      _ => warn!(error = outcome.error.as_deref().unwrap_or_default(), "task failed"),
    }

    self.monitor.end_operation(
      &task_id,
      &self.id,
      state == TaskState::Completed,
      outcome.error.as_deref(),
    );
    record.finish(state, outcome);
  }
}
