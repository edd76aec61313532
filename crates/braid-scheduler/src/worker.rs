//! Worker-side liveness for in-process workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::scheduler::DistributedTaskScheduler;
use crate::types::WorkerInfo;

/// A worker registered with a scheduler that reports its own heartbeat.
///
/// Remote workers heartbeat over their transport; a worker served by
/// [`LocalTransport`](crate::LocalTransport) lives in this process, so this
/// handle drives its heartbeat at the scheduler's heartbeat interval. Dropping
/// the handle stops the heartbeat, after which the worker goes offline.
pub struct LocalWorker {
  id: String,
  scheduler: Arc<DistributedTaskScheduler>,
  cancel: CancellationToken,
  heartbeat: Option<JoinHandle<()>>,
}

impl LocalWorker {
  /// Register `info` and start heartbeating for it.
  pub fn start(
    scheduler: Arc<DistributedTaskScheduler>,
    info: WorkerInfo,
  ) -> Result<Self, SchedulerError> {
    let id = info.id.clone();
    scheduler.register_worker(info)?;

    let cancel = CancellationToken::new();
    let period = scheduler
      .settings()
      .heartbeat_interval()
      .max(Duration::from_millis(1));
    let heartbeat = tokio::spawn(heartbeat_loop(
      scheduler.clone(),
      id.clone(),
      period,
      cancel.clone(),
    ));
    info!(worker_id = %id, period_ms = period.as_millis() as u64, "local worker started");

    Ok(Self {
      id,
      scheduler,
      cancel,
      heartbeat: Some(heartbeat),
    })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Stop heartbeating and unregister the worker.
  pub async fn stop(mut self) -> Result<WorkerInfo, SchedulerError> {
    self.cancel.cancel();
    if let Some(heartbeat) = self.heartbeat.take() {
      if let Err(e) = heartbeat.await {
        warn!(worker_id = %self.id, error = %e, "heartbeat loop failed");
      }
    }
    self.scheduler.unregister_worker(&self.id)
  }
}

impl Drop for LocalWorker {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

async fn heartbeat_loop(
  scheduler: Arc<DistributedTaskScheduler>,
  worker_id: String,
  period: Duration,
  cancel: CancellationToken,
) {
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = interval.tick() => {
        if let Err(e) = scheduler.heartbeat(&worker_id) {
          // Unregistered behind our back
          warn!(worker_id = %worker_id, error = %e, "heartbeat rejected");
          break;
        }
      }
    }
  }
  debug!(worker_id = %worker_id, "heartbeat loop stopped");
}
