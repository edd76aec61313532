use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{NodeKind, WorkflowEdge, WorkflowNode};

/// A workflow graph ready for registration with an orchestrator.
///
/// Definitions are treated as immutable once registered; the orchestrator
/// shares them between instances behind an `Arc`.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
  pub id: String,
  pub name: String,
  pub description: String,
  pub nodes: HashMap<String, WorkflowNode>,
  pub edges: Vec<WorkflowEdge>,
  pub start_node: Option<String>,
  pub end_nodes: Vec<String>,
  pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      description: String::new(),
      nodes: HashMap::new(),
      edges: Vec::new(),
      start_node: None,
      end_nodes: Vec::new(),
      created_at: Utc::now(),
    }
  }

  /// Add a node. The first node added becomes the start node unless one is
  /// set explicitly.
  pub fn add_node(&mut self, node: WorkflowNode) -> Result<(), WorkflowError> {
    if self.nodes.contains_key(&node.id) {
      return Err(WorkflowError::DuplicateNode(node.id));
    }
    if self.start_node.is_none() {
      self.start_node = Some(node.id.clone());
    }
    self.nodes.insert(node.id.clone(), node);
    Ok(())
  }

  /// Add an edge between two existing nodes.
  pub fn add_edge(&mut self, edge: WorkflowEdge) -> Result<(), WorkflowError> {
    if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
      return Err(WorkflowError::InvalidEdge {
        from: edge.source,
        to: edge.target,
      });
    }

    let index = self.edges.len();
    if let Some(source) = self.nodes.get_mut(&edge.source) {
      source.outgoing.push(index);
    }
    if let Some(target) = self.nodes.get_mut(&edge.target) {
      target.incoming.push(index);
    }
    self.edges.push(edge);
    Ok(())
  }

  pub fn set_start_node(&mut self, node_id: impl Into<String>) -> Result<(), WorkflowError> {
    let node_id = node_id.into();
    if !self.nodes.contains_key(&node_id) {
      return Err(WorkflowError::StartNodeNotFound(node_id));
    }
    self.start_node = Some(node_id);
    Ok(())
  }

  pub fn set_end_nodes<I, S>(&mut self, node_ids: I) -> Result<(), WorkflowError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let node_ids: Vec<String> = node_ids.into_iter().map(Into::into).collect();
    if let Some(missing) = node_ids.iter().find(|id| !self.nodes.contains_key(*id)) {
      return Err(WorkflowError::EndNodeNotFound(missing.clone()));
    }
    self.end_nodes = node_ids;
    Ok(())
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&WorkflowNode> {
    self.nodes.get(node_id)
  }

  pub fn is_end_node(&self, node_id: &str) -> bool {
    self.end_nodes.iter().any(|id| id == node_id)
  }

  /// Edges leaving `node_id`, in insertion order.
  pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &WorkflowEdge> {
    self
      .nodes
      .get(node_id)
      .into_iter()
      .flat_map(|node| node.outgoing.iter())
      .filter_map(|index| self.edges.get(*index))
  }

  /// Distinct source nodes of the edges entering `node_id`.
  pub fn parents(&self, node_id: &str) -> Vec<&str> {
    let mut parents: Vec<&str> = Vec::new();
    let incoming = self
      .nodes
      .get(node_id)
      .into_iter()
      .flat_map(|node| node.incoming.iter())
      .filter_map(|index| self.edges.get(*index));
    for edge in incoming {
      if !parents.contains(&edge.source.as_str()) {
        parents.push(edge.source.as_str());
      }
    }
    parents
  }

  /// Targets activated by `node_id` producing `output`.
  ///
  /// Every edge whose predicate accepts the output contributes its target;
  /// end nodes activate nothing.
  pub fn next_nodes(&self, node_id: &str, output: &Value) -> Vec<String> {
    if self.is_end_node(node_id) {
      return Vec::new();
    }

    let mut next: Vec<String> = Vec::new();
    for edge in self.outgoing_edges(node_id) {
      if edge.accepts(output) && !next.contains(&edge.target) {
        next.push(edge.target.clone());
      }
    }
    next
  }

  /// Distinct capabilities referenced by task nodes.
  pub fn capabilities(&self) -> Vec<String> {
    let mut capabilities: Vec<String> = self
      .nodes
      .values()
      .filter_map(|node| node.capability.clone())
      .collect();
    capabilities.sort();
    capabilities.dedup();
    capabilities
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(
      self.nodes.keys(),
      self.edges.iter().map(|edge| (&edge.source, &edge.target)),
    )
  }

  /// Check the structural rules a definition must satisfy before it can run.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    let start = self
      .start_node
      .as_ref()
      .ok_or(WorkflowError::MissingStartNode)?;
    if !self.nodes.contains_key(start) {
      return Err(WorkflowError::StartNodeNotFound(start.clone()));
    }

    if self.end_nodes.is_empty() {
      return Err(WorkflowError::NoEndNodes);
    }
    if let Some(missing) = self.end_nodes.iter().find(|id| !self.nodes.contains_key(*id)) {
      return Err(WorkflowError::EndNodeNotFound(missing.clone()));
    }

    if let Some(edge) = self
      .edges
      .iter()
      .find(|e| !self.nodes.contains_key(&e.source) || !self.nodes.contains_key(&e.target))
    {
      return Err(WorkflowError::InvalidEdge {
        from: edge.source.clone(),
        to: edge.target.clone(),
      });
    }

    if let Some(node) = self
      .nodes
      .values()
      .find(|n| n.kind == NodeKind::Task && n.capability.as_deref().is_none_or(str::is_empty))
    {
      return Err(WorkflowError::MissingCapability(node.id.clone()));
    }

    let graph = self.graph();
    if graph.has_cycle() {
      return Err(WorkflowError::CycleDetected);
    }

    let reachable = graph.reachable_from(start);
    if !self.end_nodes.iter().any(|id| reachable.contains(id)) {
      return Err(WorkflowError::UnreachableEndNodes {
        start: start.clone(),
      });
    }

    Ok(())
  }
}
