//! Braid Scheduler
//!
//! A registry of remote workers and the tasks handed to them.
//!
//! ```text
//! submit_task ──► pending (sorted by priority, descending)
//!                     │ assign pass: idle workers by ascending load,
//!                     │ first one advertising the capability
//!                     ▼
//!                 running ──► WorkerTransport::dispatch ──► worker
//!                     │                                      │
//!                     ◄──────── completion channel / complete_task
//!                     ▼
//!                 completed
//! ```
//!
//! A periodic tick runs the assignment pass and liveness detection: a worker
//! that has not been seen for twice the heartbeat interval is marked offline.
//! Tasks with no eligible worker stay pending; they are never dropped.
//! Workers report their own heartbeats; in-process workers get theirs from a
//! [`LocalWorker`] handle.
//!
//! [`RemoteExecutor`] plugs the scheduler into a task lifecycle manager as an
//! ordinary executor.

mod error;
mod remote;
mod scheduler;
mod transport;
mod types;
mod worker;

pub use error::{SchedulerError, TransportError};
pub use remote::RemoteExecutor;
pub use scheduler::DistributedTaskScheduler;
pub use transport::{LocalTransport, WorkerTransport};
pub use types::{
  DistributedTask, SchedulerStats, TaskCompletion, WorkerInfo, WorkerState, WorkerStats,
};
pub use worker::LocalWorker;
