//! Braid Task
//!
//! Task lifecycle management: capability-keyed pools of agents that queue,
//! gate and execute units of work through an injected [`TaskExecutor`].
//!
//! ```text
//! TaskLifecycleManager
//!   ├── "research" → AgentPool ── round robin ──┬── SingleAgent (queue + semaphore)
//!   │                                           ├── SingleAgent
//!   │                                           └── SingleAgent
//!   └── "docs"     → AgentPool ── ...
//!
//!                  TaskDirectory (shared): task id → context + state watch
//! ```
//!
//! Each [`SingleAgent`] owns a priority queue and a semaphore bounding its
//! in-flight executions. Tasks may depend on other tasks (in any pool of the
//! same manager); a dependent task is queued only once every dependency has
//! completed. Executor errors and panics are captured on the task and never
//! reach the agent's processing loop.

mod agent;
mod directory;
mod error;
mod executor;
mod manager;
mod monitor;
mod pool;
mod types;

pub use agent::SingleAgent;
pub use directory::TaskDirectory;
pub use error::{TaskError, TaskExecutionError};
pub use executor::{FnExecutor, TaskExecutor, executor_fn};
pub use manager::{TaskLifecycleManager, TaskStep};
pub use monitor::{ChannelMonitor, MonitorEvent, MonitoringSink, NoopMonitor};
pub use pool::AgentPool;
pub use types::{TaskContext, TaskOutcome, TaskPriority, TaskState};
