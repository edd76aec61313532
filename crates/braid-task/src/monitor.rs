//! Monitoring hooks around task execution.
//!
//! Agents call [`MonitoringSink::start_operation`] right before handing a task
//! to its executor and [`MonitoringSink::end_operation`] once it finishes.
//! Sinks are synchronous and must return immediately.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receives start/end notifications for every task execution.
pub trait MonitoringSink: Send + Sync {
  /// `owner` is the executing agent, `kind` the task's capability.
  fn start_operation(&self, task_id: &str, owner: &str, kind: &str);

  fn end_operation(&self, task_id: &str, owner: &str, success: bool, error: Option<&str>);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopMonitor;

impl MonitoringSink for NoopMonitor {
  fn start_operation(&self, _task_id: &str, _owner: &str, _kind: &str) {}

  fn end_operation(&self, _task_id: &str, _owner: &str, _success: bool, _error: Option<&str>) {}
}

/// Operation events forwarded by [`ChannelMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
  Started {
    task_id: String,
    owner: String,
    kind: String,
  },
  Ended {
    task_id: String,
    owner: String,
    success: bool,
    error: Option<String>,
  },
}

/// A sink that forwards events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls an agent.
#[derive(Debug, Clone)]
pub struct ChannelMonitor {
  sender: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelMonitor {
  pub fn new(sender: mpsc::UnboundedSender<MonitorEvent>) -> Self {
    Self { sender }
  }
}

impl MonitoringSink for ChannelMonitor {
  fn start_operation(&self, task_id: &str, owner: &str, kind: &str) {
    // Receiver may have been dropped
    let _ = self.sender.send(MonitorEvent::Started {
      task_id: task_id.to_string(),
      owner: owner.to_string(),
      kind: kind.to_string(),
    });
  }

  fn end_operation(&self, task_id: &str, owner: &str, success: bool, error: Option<&str>) {
    let _ = self.sender.send(MonitorEvent::Ended {
      task_id: task_id.to_string(),
      owner: owner.to_string(),
      success,
      error: error.map(str::to_string),
    });
  }
}
