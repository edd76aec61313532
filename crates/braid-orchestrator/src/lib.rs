//! Braid Orchestrator
//!
//! Drives workflow instances over registered [`WorkflowDefinition`]s.
//!
//! ```text
//! register_definition ──► definitions (immutable, shared)
//!                                  │
//! create_instance ──► WorkflowInstance (Created, current = {start})
//!                                  │ start_instance
//!                                  ▼
//!                      execution loop (one tokio task per instance)
//!                        ├── Task nodes ──► TaskLifecycleManager
//!                        ├── Decision nodes: predicate over the context
//!                        └── Fork / Join / Merge: pass through
//!                                  │
//!                      snapshots ──► watch channel ──► get / wait_for_instance
//! ```
//!
//! Each loop owns its instance outright and publishes a snapshot after every
//! cycle; callers only ever observe snapshots. Pausing and cancelling are
//! requested through tokens and take effect at the loop's next cycle boundary
//! (cancellation also reaches task nodes already in flight).
//!
//! [`WorkflowDefinition`]: braid_workflow::WorkflowDefinition

mod error;
mod input;
mod instance;
mod orchestrator;
mod runner;

pub use error::{NodeExecutionError, OrchestratorError};
pub use input::{InputRenderer, TemplateRenderer};
pub use instance::{InstanceState, WorkflowInstance};
pub use orchestrator::WorkflowOrchestrator;
