//! Braid Config
//!
//! This crate contains the serializable configuration types for braid:
//!
//! - [`Settings`]: runtime knobs for the task lifecycle manager, the workflow
//!   orchestrator and the distributed scheduler.
//! - [`WorkflowDef`]: the declarative workflow file format. These types describe
//!   a workflow before it is converted into an executable definition.
//!
//! Configuration is loaded from JSON files (via the CLI with `--config` or a
//! workflow file argument).

mod edge;
mod error;
mod node;
mod settings;
mod workflow;

pub use edge::EdgeDef;
pub use error::ConfigError;
pub use node::{NodeDef, NodeType};
pub use settings::{LifecycleSettings, OrchestratorSettings, SchedulerSettings, Settings};
pub use workflow::WorkflowDef;
