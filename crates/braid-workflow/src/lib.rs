//! Braid Workflow
//!
//! This crate provides the executable workflow representation for braid.
//! A [`WorkflowDefinition`] is a directed graph of [`WorkflowNode`]s connected by
//! [`WorkflowEdge`]s, with a start node and a set of end nodes.
//!
//! Definitions are assembled with the [`WorkflowBuilder`] DSL or converted from a
//! declarative [`braid_config::WorkflowDef`], then validated before they are
//! handed to the orchestrator:
//! - The start node exists
//! - At least one end node exists and is reachable from the start node
//! - Every edge references known nodes
//! - Every task node names a capability

mod builder;
mod error;
mod graph;
mod node;
mod predicate;
mod resolve;
mod workflow;

pub use builder::WorkflowBuilder;
pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{NodeKind, WorkflowEdge, WorkflowNode};
pub use predicate::Predicate;
pub use workflow::WorkflowDefinition;
