use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use braid_config::SchedulerSettings;
use braid_task::{TaskOutcome, TaskState};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SchedulerError, TransportError};
use crate::transport::WorkerTransport;
use crate::types::{
  DistributedTask, SchedulerStats, TaskCompletion, WorkerInfo, WorkerState, WorkerStats,
};

#[derive(Default)]
struct SchedulerState {
  workers: HashMap<String, WorkerInfo>,
  /// Sorted by priority, descending; FIFO among equal priorities.
  pending: Vec<DistributedTask>,
  running: HashMap<String, DistributedTask>,
  completed: HashMap<String, DistributedTask>,
  signals: HashMap<String, watch::Sender<TaskState>>,
}

impl SchedulerState {
  fn signal(&self, task_id: &str, state: TaskState) {
    if let Some(signal) = self.signals.get(task_id) {
      signal.send_replace(state);
    }
  }

  fn task(&self, task_id: &str) -> Option<&DistributedTask> {
    self
      .running
      .get(task_id)
      .or_else(|| self.completed.get(task_id))
      .or_else(|| self.pending.iter().find(|task| task.id == task_id))
  }
}

struct LoopHandle {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Assigns tasks to registered workers by capability and load.
pub struct DistributedTaskScheduler {
  settings: SchedulerSettings,
  transport: Arc<dyn WorkerTransport>,
  state: Mutex<SchedulerState>,
  completions: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskCompletion>>,
  tick_loop: Mutex<Option<LoopHandle>>,
}

impl DistributedTaskScheduler {
  /// `completions` receives outcomes reported by workers (usually the
  /// receiving half of the channel handed to the transport).
  pub fn new(
    settings: SchedulerSettings,
    transport: Arc<dyn WorkerTransport>,
    completions: mpsc::UnboundedReceiver<TaskCompletion>,
  ) -> Self {
    Self {
      settings,
      transport,
      state: Mutex::new(SchedulerState::default()),
      completions: tokio::sync::Mutex::new(completions),
      tick_loop: Mutex::new(None),
    }
  }

  pub fn settings(&self) -> &SchedulerSettings {
    &self.settings
  }

  pub fn register_worker(&self, mut worker: WorkerInfo) -> Result<(), SchedulerError> {
    let mut state = self.state.lock();
    if state.workers.contains_key(&worker.id) {
      return Err(SchedulerError::DuplicateWorker(worker.id));
    }
    worker.last_seen = Utc::now();
    info!(
      worker_id = %worker.id,
      address = %worker.address,
      capabilities = ?worker.capabilities,
      "worker registered"
    );
    state.workers.insert(worker.id.clone(), worker);
    Ok(())
  }

  /// Remove a worker. A task it was running stays running until a completion
  /// for it arrives.
  pub fn unregister_worker(&self, worker_id: &str) -> Result<WorkerInfo, SchedulerError> {
    let worker = self
      .state
      .lock()
      .workers
      .remove(worker_id)
      .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.to_string()))?;
    match &worker.current_task {
      Some(task_id) => warn!(worker_id = %worker_id, task_id = %task_id, "worker unregistered while running a task"),
      None => info!(worker_id = %worker_id, "worker unregistered"),
    }
    Ok(worker)
  }

  /// Record a liveness signal. An offline or errored worker without a task
  /// becomes idle again.
  pub fn heartbeat(&self, worker_id: &str) -> Result<(), SchedulerError> {
    let mut state = self.state.lock();
    let worker = state
      .workers
      .get_mut(worker_id)
      .ok_or_else(|| SchedulerError::WorkerNotFound(worker_id.to_string()))?;

    worker.last_seen = Utc::now();
    if matches!(worker.state, WorkerState::Offline | WorkerState::Error) {
      worker.state = match worker.current_task {
        Some(_) => WorkerState::Busy,
        None => WorkerState::Idle,
      };
      info!(worker_id = %worker_id, state = ?worker.state, "worker back online");
    }
    Ok(())
  }

  pub fn get_worker(&self, worker_id: &str) -> Option<WorkerInfo> {
    self.state.lock().workers.get(worker_id).cloned()
  }

  pub fn workers(&self) -> Vec<WorkerInfo> {
    let mut workers: Vec<WorkerInfo> = self.state.lock().workers.values().cloned().collect();
    workers.sort_by(|a, b| a.id.cmp(&b.id));
    workers
  }

  /// Queue a task. It stays pending until a capable worker is idle.
  pub fn submit_task(&self, capability: impl Into<String>, input: Value, priority: i32) -> String {
    let task = DistributedTask {
      id: Uuid::new_v4().to_string(),
      capability: capability.into(),
      input,
      priority,
      state: TaskState::Queued,
      assigned_worker: None,
      result: None,
      created_at: Utc::now(),
      assigned_at: None,
      completed_at: None,
    };
    let task_id = task.id.clone();
    info!(task_id = %task_id, capability = %task.capability, priority, "task submitted");

    let mut state = self.state.lock();
    let (signal, _) = watch::channel(TaskState::Queued);
    state.signals.insert(task_id.clone(), signal);
    state.pending.push(task);
    // Stable: equal priorities keep submission order
    state.pending.sort_by_key(|task| Reverse(task.priority));
    task_id
  }

  /// Cancel a pending task. Tasks already dispatched cannot be recalled;
  /// returns `false` for them and for finished tasks.
  pub fn cancel_task(&self, task_id: &str) -> Result<bool, SchedulerError> {
    let mut state = self.state.lock();
    let Some(index) = state.pending.iter().position(|task| task.id == task_id) else {
      return match state.task(task_id) {
        Some(_) => Ok(false),
        None => Err(SchedulerError::TaskNotFound(task_id.to_string())),
      };
    };

    let mut task = state.pending.remove(index);
    task.state = TaskState::Cancelled;
    task.result = Some(TaskOutcome::failed("task cancelled"));
    task.completed_at = Some(Utc::now());
    state.signal(task_id, TaskState::Cancelled);
    state.completed.insert(task.id.clone(), task);
    info!(task_id = %task_id, "pending task cancelled");
    Ok(true)
  }

  /// Match pending tasks to idle workers and dispatch them. Returns the number
  /// of tasks dispatched successfully.
  pub async fn assign_tasks(&self) -> usize {
    let plan = self.plan_assignments();
    if plan.is_empty() {
      return 0;
    }

    let dispatches = plan.iter().map(|(task, worker)| async move {
      (task, worker, self.transport.dispatch(task, worker).await)
    });

    let mut dispatched = 0;
    for (task, worker, result) in join_all(dispatches).await {
      match result {
        Ok(()) => {
          dispatched += 1;
          info!(task_id = %task.id, worker_id = %worker.id, "task dispatched");
        }
        Err(e) => self.fail_dispatch(&task.id, &worker.id, e),
      }
    }
    dispatched
  }

  /// Reserve workers for pending tasks under the lock. Each chosen worker
  /// leaves the candidate list, so a worker receives at most one task.
  fn plan_assignments(&self) -> Vec<(DistributedTask, WorkerInfo)> {
    let mut guard = self.state.lock();
    let state = &mut *guard;

    let mut candidates: Vec<&WorkerInfo> = state
      .workers
      .values()
      .filter(|worker| worker.state == WorkerState::Idle)
      .collect();
    candidates.sort_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id)));
    let mut candidates: Vec<String> = candidates.into_iter().map(|w| w.id.clone()).collect();

    let mut plan = Vec::new();
    let mut remaining = Vec::with_capacity(state.pending.len());
    for mut task in state.pending.drain(..) {
      let position = candidates.iter().position(|id| {
        state
          .workers
          .get(id)
          .is_some_and(|worker| worker.has_capability(&task.capability))
      });
      let Some(position) = position else {
        remaining.push(task);
        continue;
      };

      let worker_id = candidates.remove(position);
      let Some(worker) = state.workers.get_mut(&worker_id) else {
        remaining.push(task);
        continue;
      };
      worker.state = WorkerState::Busy;
      worker.load = (worker.load + self.settings.load_increment).min(1.0);
      worker.current_task = Some(task.id.clone());

      task.state = TaskState::Running;
      task.assigned_worker = Some(worker_id.clone());
      task.assigned_at = Some(Utc::now());
      if let Some(signal) = state.signals.get(&task.id) {
        signal.send_replace(TaskState::Running);
      }
      debug!(task_id = %task.id, worker_id = %worker_id, load = worker.load, "task assigned");

      plan.push((task.clone(), worker.clone()));
      state.running.insert(task.id.clone(), task);
    }
    state.pending = remaining;
    plan
  }

  fn fail_dispatch(&self, task_id: &str, worker_id: &str, err: TransportError) {
    error!(task_id = %task_id, worker_id = %worker_id, error = %err, "dispatch failed");
    let mut state = self.state.lock();

    if let Some(worker) = state.workers.get_mut(worker_id) {
      if worker.current_task.as_deref() == Some(task_id) {
        worker.current_task = None;
        worker.load = (worker.load - self.settings.load_increment).max(0.0);
        worker.state = WorkerState::Error;
      }
    }

    // A completion may have raced the failed acknowledgement
    let Some(mut task) = state.running.remove(task_id) else {
      return;
    };
    task.state = TaskState::Failed;
    task.result = Some(TaskOutcome::failed(err.to_string()));
    task.completed_at = Some(Utc::now());
    state.signal(task_id, TaskState::Failed);
    state.completed.insert(task.id.clone(), task);
  }

  /// Record the outcome of a running task and free its worker.
  pub fn complete_task(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), SchedulerError> {
    let mut state = self.state.lock();
    let Some(mut task) = state.running.remove(task_id) else {
      return match state.task(task_id) {
        Some(task) => Err(SchedulerError::InvalidTaskState {
          task_id: task_id.to_string(),
          state: task.state,
        }),
        None => Err(SchedulerError::TaskNotFound(task_id.to_string())),
      };
    };

    let success = outcome.success;
    task.state = if success {
      TaskState::Completed
    } else {
      TaskState::Failed
    };
    task.result = Some(outcome);
    task.completed_at = Some(Utc::now());

    if let Some(worker_id) = &task.assigned_worker {
      if let Some(worker) = state.workers.get_mut(worker_id) {
        worker.load = (worker.load - self.settings.load_increment).max(0.0);
        worker.total_tasks += 1;
        if success {
          worker.successful_tasks += 1;
        }
        worker.last_seen = Utc::now();
        if worker.current_task.as_deref() == Some(task_id) {
          worker.current_task = None;
          worker.state = WorkerState::Idle;
        }
      }
    }

    info!(
      task_id = %task_id,
      worker_id = task.assigned_worker.as_deref().unwrap_or_default(),
      success,
      "task finished"
    );
    state.signal(task_id, task.state);
    state.completed.insert(task.id.clone(), task);
    Ok(())
  }

  /// Apply every completion waiting on the channel. Returns how many were
  /// applied (zero while the tick loop owns the channel).
  pub fn process_completions(&self) -> usize {
    let Ok(mut completions) = self.completions.try_lock() else {
      return 0;
    };
    let mut applied = 0;
    while let Ok(completion) = completions.try_recv() {
      self.apply_completion(completion);
      applied += 1;
    }
    applied
  }

  fn apply_completion(&self, completion: TaskCompletion) {
    if let Err(e) = self.complete_task(&completion.task_id, completion.outcome) {
      warn!(task_id = %completion.task_id, error = %e, "ignoring completion");
    }
  }

  /// Mark workers silent for longer than twice the heartbeat interval as
  /// offline. Returns the ids of newly offline workers. Their running tasks
  /// are not reassigned.
  pub fn update_worker_status(&self) -> Vec<String> {
    let offline_after = chrono::Duration::from_std(self.settings.offline_after())
      .unwrap_or(chrono::Duration::MAX);
    let now = Utc::now();

    let mut offline = Vec::new();
    for worker in self.state.lock().workers.values_mut() {
      if worker.state != WorkerState::Offline && now - worker.last_seen > offline_after {
        worker.state = WorkerState::Offline;
        warn!(
          worker_id = %worker.id,
          last_seen = %worker.last_seen,
          current_task = worker.current_task.as_deref().unwrap_or_default(),
          "worker offline"
        );
        offline.push(worker.id.clone());
      }
    }
    offline.sort();
    offline
  }

  /// One scheduler cycle: drain completions, assign, detect offline workers.
  pub async fn tick(&self) {
    self.process_completions();
    self.run_passes().await;
  }

  async fn run_passes(&self) {
    let dispatched = self.assign_tasks().await;
    let offline = self.update_worker_status();
    if dispatched > 0 || !offline.is_empty() {
      debug!(dispatched, offline = offline.len(), "scheduler tick");
    }
  }

  /// Start the periodic tick loop. Completions are applied as they arrive.
  pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
    let mut tick_loop = self.tick_loop.lock();
    if tick_loop.as_ref().is_some_and(|l| !l.handle.is_finished()) {
      return Err(SchedulerError::AlreadyRunning);
    }

    let cancel = CancellationToken::new();
    let scheduler = self.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { scheduler.run_loop(token).await });
    *tick_loop = Some(LoopHandle { cancel, handle });
    info!(
      tick_interval_ms = self.settings.tick_interval_ms,
      heartbeat_interval_ms = self.settings.heartbeat_interval_ms,
      "scheduler started"
    );
    Ok(())
  }

  async fn run_loop(&self, cancel: CancellationToken) {
    let mut completions = self.completions.lock().await;
    let mut interval = tokio::time::interval(self.settings.tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        completion = completions.recv() => match completion {
          Some(completion) => self.apply_completion(completion),
          None => {
            debug!("completion channel closed");
            cancel.cancelled().await;
            break;
          }
        },
        _ = interval.tick() => self.run_passes().await,
      }
    }
    info!("scheduler stopped");
  }

  /// Stop the tick loop and wait for it to exit.
  pub async fn stop(&self) {
    let Some(tick_loop) = self.tick_loop.lock().take() else {
      return;
    };
    tick_loop.cancel.cancel();
    if let Err(e) = tick_loop.handle.await {
      error!(error = %e, "scheduler loop failed");
    }
  }

  pub fn get_task(&self, task_id: &str) -> Option<DistributedTask> {
    self.state.lock().task(task_id).cloned()
  }

  pub fn get_task_result(&self, task_id: &str) -> Option<TaskOutcome> {
    self
      .state
      .lock()
      .completed
      .get(task_id)
      .and_then(|task| task.result.clone())
  }

  /// Forget every finished task and its wait signal. The scheduler never
  /// drops finished tasks on its own; long-lived owners call this once they
  /// have collected the results they need. Returns how many were removed.
  pub fn purge_finished(&self) -> usize {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    let purged = state.completed.len();
    for task_id in state.completed.keys() {
      state.signals.remove(task_id);
    }
    state.completed.clear();
    if purged > 0 {
      debug!(purged, "finished tasks purged");
    }
    purged
  }

  /// Wait for a task to finish. Failed tasks return their outcome; a timeout
  /// returns [`SchedulerError::NotReady`].
  pub async fn wait_for_task(
    &self,
    task_id: &str,
    timeout: Option<Duration>,
  ) -> Result<TaskOutcome, SchedulerError> {
    let mut rx = self
      .state
      .lock()
      .signals
      .get(task_id)
      .map(|signal| signal.subscribe())
      .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;

    let wait = async {
      if let Ok(state) = rx.wait_for(TaskState::is_terminal).await {
        return *state;
      }
      *rx.borrow()
    };
    let state = match timeout {
      Some(limit) => tokio::time::timeout(limit, wait)
        .await
        .map_err(|_| SchedulerError::NotReady {
          task_id: task_id.to_string(),
        })?,
      None => wait.await,
    };

    if state == TaskState::Cancelled {
      return Err(SchedulerError::Cancelled {
        task_id: task_id.to_string(),
      });
    }
    self
      .get_task_result(task_id)
      .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
  }

  pub fn stats(&self) -> SchedulerStats {
    let state = self.state.lock();
    let count = |wanted: WorkerState| {
      state
        .workers
        .values()
        .filter(|worker| worker.state == wanted)
        .count()
    };

    let mut workers: Vec<WorkerStats> = state
      .workers
      .values()
      .map(|worker| WorkerStats {
        id: worker.id.clone(),
        state: worker.state,
        load: worker.load,
        total_tasks: worker.total_tasks,
        success_rate: worker.success_rate(),
      })
      .collect();
    workers.sort_by(|a, b| a.id.cmp(&b.id));

    SchedulerStats {
      total_workers: state.workers.len(),
      online_workers: state.workers.len() - count(WorkerState::Offline),
      idle_workers: count(WorkerState::Idle),
      busy_workers: count(WorkerState::Busy),
      pending_tasks: state.pending.len(),
      running_tasks: state.running.len(),
      completed_tasks: state
        .completed
        .values()
        .filter(|task| task.state == TaskState::Completed)
        .count(),
      failed_tasks: state
        .completed
        .values()
        .filter(|task| task.state == TaskState::Failed)
        .count(),
      workers,
    }
  }
}
