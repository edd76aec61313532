use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use braid_config::OrchestratorSettings;
use braid_task::TaskLifecycleManager;
use braid_workflow::WorkflowDefinition;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::OrchestratorError;
use crate::input::{InputRenderer, TemplateRenderer};
use crate::instance::{InstanceState, WorkflowInstance};
use crate::runner::InstanceRunner;

struct RunHandle {
  cancel: CancellationToken,
  pause: CancellationToken,
  handle: JoinHandle<WorkflowInstance>,
}

struct InstanceEntry {
  definition: Arc<WorkflowDefinition>,
  publisher: Arc<watch::Sender<WorkflowInstance>>,
  /// The instance while no loop owns it (created, paused or stopped).
  parked: Option<WorkflowInstance>,
  run: Option<RunHandle>,
}

impl InstanceEntry {
  fn snapshot(&self) -> WorkflowInstance {
    self.publisher.borrow().clone()
  }
}

/// Registry of workflow definitions and driver of their instances.
pub struct WorkflowOrchestrator {
  settings: OrchestratorSettings,
  lifecycle: Arc<TaskLifecycleManager>,
  renderer: Arc<dyn InputRenderer>,
  definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
  instances: Mutex<HashMap<String, InstanceEntry>>,
}

impl WorkflowOrchestrator {
  pub fn new(lifecycle: Arc<TaskLifecycleManager>, settings: OrchestratorSettings) -> Self {
    Self {
      settings,
      lifecycle,
      renderer: Arc::new(TemplateRenderer::new()),
      definitions: RwLock::new(HashMap::new()),
      instances: Mutex::new(HashMap::new()),
    }
  }

  /// Replace the default template renderer.
  pub fn with_renderer(mut self, renderer: Arc<dyn InputRenderer>) -> Self {
    self.renderer = renderer;
    self
  }

  pub fn lifecycle(&self) -> &Arc<TaskLifecycleManager> {
    &self.lifecycle
  }

  /// Validate and register a definition. An id can only be registered once.
  pub fn register_definition(&self, definition: WorkflowDefinition) -> Result<(), OrchestratorError> {
    definition
      .validate()
      .map_err(|source| OrchestratorError::InvalidDefinition {
        workflow_id: definition.id.clone(),
        source,
      })?;

    let mut definitions = self.definitions.write();
    if definitions.contains_key(&definition.id) {
      return Err(OrchestratorError::DuplicateDefinition(definition.id));
    }
    info!(
      workflow_id = %definition.id,
      nodes = definition.nodes.len(),
      edges = definition.edges.len(),
      "workflow definition registered"
    );
    definitions.insert(definition.id.clone(), Arc::new(definition));
    Ok(())
  }

  pub fn get_definition(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
    self.definitions.read().get(workflow_id).cloned()
  }

  pub fn definition_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.definitions.read().keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Create an instance positioned at the definition's start node.
  pub fn create_instance(
    &self,
    workflow_id: &str,
    context: Map<String, Value>,
  ) -> Result<String, OrchestratorError> {
    let definition = self
      .get_definition(workflow_id)
      .ok_or_else(|| OrchestratorError::DefinitionNotFound(workflow_id.to_string()))?;
    let start = definition
      .start_node
      .as_deref()
      .ok_or_else(|| OrchestratorError::InvalidDefinition {
        workflow_id: workflow_id.to_string(),
        source: braid_workflow::WorkflowError::MissingStartNode,
      })?;

    let instance = WorkflowInstance::new(workflow_id, start, context);
    let instance_id = instance.id.clone();
    let (publisher, _) = watch::channel(instance.clone());

    self.instances.lock().insert(
      instance_id.clone(),
      InstanceEntry {
        definition,
        publisher: Arc::new(publisher),
        parked: Some(instance),
        run: None,
      },
    );
    info!(instance_id = %instance_id, workflow_id = %workflow_id, "workflow instance created");
    Ok(instance_id)
  }

  /// Created -> Running: spawn the instance's execution loop.
  pub fn start_instance(&self, instance_id: &str) -> Result<(), OrchestratorError> {
    self.launch(instance_id, InstanceState::Created, "start")
  }

  /// Paused -> Running: restart the loop from the preserved node sets.
  pub fn resume_instance(&self, instance_id: &str) -> Result<(), OrchestratorError> {
    self.launch(instance_id, InstanceState::Paused, "resume")
  }

  fn launch(
    &self,
    instance_id: &str,
    expected: InstanceState,
    operation: &'static str,
  ) -> Result<(), OrchestratorError> {
    let mut instances = self.instances.lock();
    let entry = instances
      .get_mut(instance_id)
      .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;

    let state = match &entry.parked {
      Some(instance) => instance.state,
      None => entry.snapshot().state,
    };
    let instance = match entry.parked.take() {
      Some(instance) if instance.state == expected => instance,
      other => {
        entry.parked = other;
        return Err(OrchestratorError::InvalidState {
          instance_id: instance_id.to_string(),
          state,
          operation,
        });
      }
    };

    let cancel = CancellationToken::new();
    let pause = CancellationToken::new();
    let runner = InstanceRunner {
      definition: entry.definition.clone(),
      graph: entry.definition.graph(),
      lifecycle: self.lifecycle.clone(),
      renderer: self.renderer.clone(),
      settings: self.settings.clone(),
      publisher: entry.publisher.clone(),
      cancel: cancel.clone(),
      pause: pause.clone(),
    };
    entry.run = Some(RunHandle {
      cancel,
      pause,
      handle: runner.spawn(instance),
    });
    info!(instance_id = %instance_id, operation, "workflow instance launched");
    Ok(())
  }

  /// Request a pause and wait for it to take effect.
  ///
  /// Nodes already executing run to completion and their results are applied
  /// before the instance is parked, so the returned state is `Paused` (or a
  /// terminal state if the instance finished in that final cycle).
  pub async fn pause_instance(&self, instance_id: &str) -> Result<InstanceState, OrchestratorError> {
    let run = {
      let mut instances = self.instances.lock();
      let entry = instances
        .get_mut(instance_id)
        .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;
      let snapshot = entry.snapshot();
      if snapshot.state != InstanceState::Running {
        return Err(OrchestratorError::InvalidState {
          instance_id: instance_id.to_string(),
          state: snapshot.state,
          operation: "pause",
        });
      }
      entry.run.take()
    };

    let Some(run) = run else {
      return Err(OrchestratorError::InvalidState {
        instance_id: instance_id.to_string(),
        state: InstanceState::Running,
        operation: "pause",
      });
    };

    run.pause.cancel();
    let instance = self.join(instance_id, run.handle).await;
    let state = instance.state;
    self.park(instance_id, instance);
    info!(instance_id = %instance_id, state = %state, "workflow instance pause settled");
    Ok(state)
  }

  /// Cancel an instance. In-flight task nodes are asked to cancel; the
  /// returned state is `Cancelled` unless the instance had already finished.
  pub async fn cancel_instance(
    &self,
    instance_id: &str,
  ) -> Result<InstanceState, OrchestratorError> {
    let run = {
      let mut instances = self.instances.lock();
      let entry = instances
        .get_mut(instance_id)
        .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;

      if let Some(instance) = entry.parked.as_mut() {
        if !instance.is_terminal() {
          instance.finish(InstanceState::Cancelled, None);
          entry.publisher.send_replace(instance.clone());
          info!(instance_id = %instance_id, "workflow instance cancelled");
        }
        return Ok(instance.state);
      }
      entry.run.take()
    };

    let Some(run) = run else {
      let state = self
        .get_instance(instance_id)
        .map(|instance| instance.state)
        .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;
      return Ok(state);
    };

    run.cancel.cancel();
    let instance = self.join(instance_id, run.handle).await;
    let state = instance.state;
    self.park(instance_id, instance);
    info!(instance_id = %instance_id, state = %state, "workflow instance cancel settled");
    Ok(state)
  }

  async fn join(&self, instance_id: &str, handle: JoinHandle<WorkflowInstance>) -> WorkflowInstance {
    match handle.await {
      Ok(instance) => instance,
      Err(e) => {
        error!(instance_id = %instance_id, error = %e, "execution loop supervisor failed");
        let mut last = self
          .get_instance(instance_id)
          .unwrap_or_else(|| WorkflowInstance::new("", "", Map::new()));
        if !last.is_terminal() {
          last.finish(InstanceState::Failed, Some(format!("execution loop failed: {e}")));
        }
        last
      }
    }
  }

  fn park(&self, instance_id: &str, instance: WorkflowInstance) {
    if let Some(entry) = self.instances.lock().get_mut(instance_id) {
      entry.publisher.send_replace(instance.clone());
      entry.parked = Some(instance);
    }
  }

  /// Latest snapshot of an instance.
  pub fn get_instance(&self, instance_id: &str) -> Option<WorkflowInstance> {
    self
      .instances
      .lock()
      .get(instance_id)
      .map(InstanceEntry::snapshot)
  }

  pub fn list_instances(&self) -> Vec<WorkflowInstance> {
    self
      .instances
      .lock()
      .values()
      .map(InstanceEntry::snapshot)
      .collect()
  }

  /// Subscribe to snapshots of an instance.
  pub fn subscribe(&self, instance_id: &str) -> Option<watch::Receiver<WorkflowInstance>> {
    self
      .instances
      .lock()
      .get(instance_id)
      .map(|entry| entry.publisher.subscribe())
  }

  /// Wait until the instance reaches a terminal state.
  pub async fn wait_for_instance(
    &self,
    instance_id: &str,
    timeout: Option<Duration>,
  ) -> Result<WorkflowInstance, OrchestratorError> {
    let mut rx = self
      .subscribe(instance_id)
      .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;

    let wait = async {
      if let Ok(instance) = rx.wait_for(WorkflowInstance::is_terminal).await {
        return instance.clone();
      }
      rx.borrow().clone()
    };

    match timeout {
      Some(limit) => tokio::time::timeout(limit, wait)
        .await
        .map_err(|_| OrchestratorError::Timeout {
          instance_id: instance_id.to_string(),
        }),
      None => Ok(wait.await),
    }
  }

  /// Cancel every instance that is still running.
  pub async fn shutdown(&self) {
    let running: Vec<String> = self
      .instances
      .lock()
      .iter()
      .filter(|(_, entry)| entry.run.is_some())
      .map(|(id, _)| id.clone())
      .collect();

    for instance_id in running {
      if let Err(e) = self.cancel_instance(&instance_id).await {
        warn!(instance_id = %instance_id, error = %e, "failed to cancel instance");
      }
    }
    info!("workflow orchestrator shut down");
  }
}
