//! Per-instance execution loop.

use std::sync::Arc;

use braid_config::OrchestratorSettings;
use braid_task::{TaskLifecycleManager, TaskPriority};
use braid_workflow::{Graph, NodeKind, WorkflowDefinition, WorkflowNode};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::error::NodeExecutionError;
use crate::input::InputRenderer;
use crate::instance::{InstanceState, WorkflowInstance};

/// Everything one execution loop needs. Owned by the spawned task.
pub(crate) struct InstanceRunner {
  pub definition: Arc<WorkflowDefinition>,
  /// Topology of `definition`, built once per launch.
  pub graph: Graph,
  pub lifecycle: Arc<TaskLifecycleManager>,
  pub renderer: Arc<dyn InputRenderer>,
  pub settings: OrchestratorSettings,
  pub publisher: Arc<watch::Sender<WorkflowInstance>>,
  pub cancel: CancellationToken,
  pub pause: CancellationToken,
}

impl InstanceRunner {
  /// Spawn the loop. The handle resolves to the instance's final snapshot; a
  /// panicking loop yields the last published snapshot marked failed.
  pub fn spawn(self, instance: WorkflowInstance) -> JoinHandle<WorkflowInstance> {
    let publisher = self.publisher.clone();
    let inner = tokio::spawn(self.run(instance));

    tokio::spawn(async move {
      match inner.await {
        Ok(instance) => instance,
        Err(e) => {
          let mut last = publisher.borrow().clone();
          error!(instance_id = %last.id, error = %e, "execution loop panicked");
          last.finish(
            InstanceState::Failed,
            Some(format!("execution loop panicked: {e}")),
          );
          publisher.send_replace(last.clone());
          last
        }
      }
    })
  }

  #[instrument(
    name = "instance_run",
    skip_all,
    fields(instance_id = %instance.id, workflow_id = %instance.workflow_id)
  )]
  async fn run(self, mut instance: WorkflowInstance) -> WorkflowInstance {
    instance.mark_running();
    self.publish(&instance);
    info!(current_nodes = ?instance.current_nodes, "workflow_started");

    let mut stalled: u32 = 0;
    loop {
      if self.cancel.is_cancelled() {
        return self.finish(instance, InstanceState::Cancelled, None);
      }
      if self.pause.is_cancelled() {
        instance.state = InstanceState::Paused;
        self.publish(&instance);
        info!(current_nodes = ?instance.current_nodes, "workflow_paused");
        return instance;
      }
      if instance.current_nodes.is_empty() {
        return self.finish(instance, InstanceState::Completed, None);
      }

      let ready = self.ready_nodes(&instance);
      if ready.is_empty() {
        stalled += 1;
        if stalled >= self.settings.stall_limit {
          let err = NodeExecutionError::DependencyUnsatisfiable {
            waiting: instance.current_nodes.clone(),
            cycles: stalled,
          };
          return self.finish(instance, InstanceState::Failed, Some(err.to_string()));
        }
        tokio::select! {
          _ = self.cancel.cancelled() => {}
          _ = self.pause.cancelled() => {}
          _ = tokio::time::sleep(self.settings.stall_backoff()) => {}
        }
        continue;
      }
      stalled = 0;

      info!(ready_nodes = ?ready, "executing batch of ready nodes");

      let executions = ready.iter().map(|node_id| {
        let span = info_span!("node_execute", node_id = %node_id);
        self.execute_node(node_id, &instance).instrument(span)
      });
      let results = join_all(executions).await;

      for (node_id, result) in ready.into_iter().zip(results) {
        match result {
          Ok(output) => {
            let next = self.definition.next_nodes(&node_id, &output);
            info!(node_id = %node_id, next_nodes = ?next, "node_completed");
            instance.complete_node(&node_id, output);
            for target in next {
              instance.activate(target);
            }
          }
          Err(_) if self.cancel.is_cancelled() => {
            return self.finish(instance, InstanceState::Cancelled, None);
          }
          Err(e) => {
            warn!(node_id = %node_id, error = %e, "node_failed");
            return self.finish(instance, InstanceState::Failed, Some(e.to_string()));
          }
        }
      }

      self.publish(&instance);
    }
  }

  /// Current nodes that can execute this cycle. A join waits until every
  /// parent has completed.
  fn ready_nodes(&self, instance: &WorkflowInstance) -> Vec<String> {
    instance
      .current_nodes
      .iter()
      .filter(|node_id| match self.definition.get_node(node_id) {
        Some(node) if node.kind == NodeKind::Join => self
          .graph
          .upstream(node_id)
          .iter()
          .all(|parent| instance.is_completed(parent)),
        _ => true,
      })
      .cloned()
      .collect()
  }

  async fn execute_node(
    &self,
    node_id: &str,
    instance: &WorkflowInstance,
  ) -> Result<Value, NodeExecutionError> {
    let node = self
      .definition
      .get_node(node_id)
      .ok_or_else(|| NodeExecutionError::NodeNotFound {
        node_id: node_id.to_string(),
      })?;

    match node.kind {
      NodeKind::Task => self.execute_task(node, instance).await,
      NodeKind::Decision => {
        let mut scope = instance.context.clone();
        scope
          .entry("nodes".to_string())
          .or_insert_with(|| serde_json::to_value(&instance.node_outputs).unwrap_or_default());
        let scope = Value::Object(scope);
        let decision = node
          .predicate
          .as_ref()
          .is_none_or(|predicate| predicate.evaluate(&scope));
        info!(decision, "decision evaluated");
        Ok(Value::Bool(decision))
      }
      NodeKind::Join | NodeKind::Fork | NodeKind::Merge => Ok(json!({
        "status": "completed",
        "node_type": node.kind,
      })),
    }
  }

  async fn execute_task(
    &self,
    node: &WorkflowNode,
    instance: &WorkflowInstance,
  ) -> Result<Value, NodeExecutionError> {
    let capability = node
      .capability
      .as_deref()
      .ok_or_else(|| NodeExecutionError::MissingCapability {
        node_id: node.id.clone(),
      })?;
    let input = self.renderer.render(&self.definition, node, instance)?;

    let outcome = self
      .lifecycle
      .execute_task_with_cancel(
        capability,
        input,
        TaskPriority::Normal,
        self.cancel.child_token(),
      )
      .await
      .map_err(|source| NodeExecutionError::Task {
        node_id: node.id.clone(),
        source,
      })?;

    if outcome.success {
      return Ok(outcome.data);
    }

    let message = outcome
      .error
      .unwrap_or_else(|| "task reported failure".to_string());
    if node.continue_on_failure {
      warn!(error = %message, "task failed, continuing");
      return Ok(json!({ "success": false, "error": message }));
    }
    Err(NodeExecutionError::TaskFailed {
      node_id: node.id.clone(),
      message,
    })
  }

  fn finish(
    &self,
    mut instance: WorkflowInstance,
    state: InstanceState,
    error: Option<String>,
  ) -> WorkflowInstance {
    match (&state, &error) {
      (InstanceState::Completed, _) => {
        info!(completed_nodes = ?instance.completed_nodes, "workflow_completed")
      }
      (_, Some(e)) => error!(error = %e, "workflow_failed"),
      _ => warn!(state = %state, "workflow_stopped"),
    }
    instance.finish(state, error);
    self.publish(&instance);
    instance
  }

  fn publish(&self, instance: &WorkflowInstance) {
    self.publisher.send_replace(instance.clone());
  }
}
