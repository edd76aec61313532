use std::collections::{HashMap, HashSet, VecDeque};

/// Edge topology of a workflow, independent of node payloads.
#[derive(Debug, Clone)]
pub struct Graph {
  /// source -> targets
  adjacency: HashMap<String, Vec<String>>,
  /// target -> sources
  reverse_adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from node ids and (source, target) pairs.
  pub fn new<'a>(
    node_ids: impl IntoIterator<Item = &'a String>,
    edges: impl IntoIterator<Item = (&'a String, &'a String)>,
  ) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node_id in node_ids {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    for (from, to) in edges {
      let downstream = adjacency.entry(from.clone()).or_default();
      if !downstream.contains(to) {
        downstream.push(to.clone());
      }
      let upstream = reverse_adjacency.entry(to.clone()).or_default();
      if !upstream.contains(from) {
        upstream.push(from.clone());
      }
    }

    Self {
      adjacency,
      reverse_adjacency,
    }
  }

  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every node reachable from `start`, including `start` itself.
  pub fn reachable_from(&self, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    if !self.adjacency.contains_key(start) {
      return seen;
    }

    let mut queue = VecDeque::from([start.to_string()]);
    seen.insert(start.to_string());
    while let Some(node_id) = queue.pop_front() {
      for next in self.downstream(&node_id) {
        if seen.insert(next.clone()) {
          queue.push_back(next.clone());
        }
      }
    }
    seen
  }

  /// Check for cycles in the graph.
  pub fn has_cycle(&self) -> bool {
    let mut visited: HashMap<&str, u8> = HashMap::new();
    self
      .adjacency
      .keys()
      .any(|id| self.dfs_cycle(id, &mut visited))
  }

  fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
    match visited.get(id) {
      Some(1) => return true,  // back edge
      Some(2) => return false, // already processed
      _ => {}
    }
    visited.insert(id, 1);
    for next in self.downstream(id) {
      if self.dfs_cycle(next, visited) {
        return true;
      }
    }
    visited.insert(id, 2);
    false
  }
}
