use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use braid_config::{LifecycleSettings, OrchestratorSettings};
use braid_orchestrator::{InstanceState, OrchestratorError, WorkflowOrchestrator};
use braid_task::{TaskExecutionError, TaskLifecycleManager, TaskOutcome, executor_fn};
use braid_workflow::{NodeKind, Predicate, WorkflowBuilder, WorkflowDefinition, WorkflowNode};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

struct Harness {
  orchestrator: WorkflowOrchestrator,
  slow_runs: Arc<AtomicUsize>,
}

fn harness() -> Harness {
  let lifecycle = Arc::new(TaskLifecycleManager::new(LifecycleSettings::default()));

  lifecycle
    .register_capability(
      "echo",
      executor_fn(|input, _cancel| async move { Ok(TaskOutcome::ok(input)) }),
    )
    .unwrap();

  let slow_runs = Arc::new(AtomicUsize::new(0));
  let runs = slow_runs.clone();
  lifecycle
    .register_capability(
      "slow",
      executor_fn(move |input, cancel: CancellationToken| {
        let runs = runs.clone();
        async move {
          runs.fetch_add(1, Ordering::SeqCst);
          tokio::select! {
            _ = cancel.cancelled() => Err(TaskExecutionError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
              Ok(TaskOutcome::ok(json!({ "value": 42, "input": input })))
            }
          }
        }
      }),
    )
    .unwrap();

  lifecycle
    .register_capability(
      "fail",
      executor_fn(|_input, _cancel| async move { Ok(TaskOutcome::failed("upstream exploded")) }),
    )
    .unwrap();

  let settings = OrchestratorSettings {
    stall_limit: 3,
    stall_backoff_ms: 5,
  };
  Harness {
    orchestrator: WorkflowOrchestrator::new(lifecycle, settings),
    slow_runs,
  }
}

fn context(value: Value) -> Map<String, Value> {
  value.as_object().cloned().unwrap_or_default()
}

fn linear(id: &str, first_capability: &str) -> WorkflowDefinition {
  WorkflowBuilder::create_workflow(id, "Linear")
    .add_task("A", "A", first_capability, json!({ "topic": "{{ topic }}" }))
    .add_task("B", "B", "echo", json!({ "from_a": "{{ nodes.A.value }}" }))
    .connect("A", "B")
    .set_end_nodes(["B"])
    .build()
    .unwrap()
}

async fn run(orchestrator: &WorkflowOrchestrator, workflow_id: &str, ctx: Value) -> String {
  let id = orchestrator
    .create_instance(workflow_id, context(ctx))
    .unwrap();
  orchestrator.start_instance(&id).unwrap();
  id
}

#[tokio::test]
async fn test_duplicate_definition_rejected() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "echo"))
    .unwrap();

  let replacement = WorkflowBuilder::create_workflow("wf", "Replacement")
    .add_task("only", "Only", "echo", json!({}))
    .set_end_nodes(["only"])
    .build()
    .unwrap();
  let result = h.orchestrator.register_definition(replacement);

  assert!(matches!(result, Err(OrchestratorError::DuplicateDefinition(id)) if id == "wf"));
  let original = h.orchestrator.get_definition("wf").unwrap();
  assert_eq!(original.name, "Linear");
  assert!(original.get_node("A").is_some());
}

#[tokio::test]
async fn test_invalid_definition_rejected() {
  let h = harness();
  let mut definition = WorkflowDefinition::new("broken", "Broken");
  definition
    .add_node(WorkflowNode::task("a", "A", "echo", json!({})))
    .unwrap();

  let result = h.orchestrator.register_definition(definition);
  assert!(matches!(result, Err(OrchestratorError::InvalidDefinition { .. })));
  assert!(h.orchestrator.get_definition("broken").is_none());
}

#[tokio::test]
async fn test_unknown_definition() {
  let h = harness();
  assert!(matches!(
    h.orchestrator.create_instance("nope", Map::new()),
    Err(OrchestratorError::DefinitionNotFound(_))
  ));
}

#[tokio::test]
async fn test_linear_workflow_completes() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "slow"))
    .unwrap();

  let id = h
    .orchestrator
    .create_instance("wf", context(json!({ "topic": "graphs" })))
    .unwrap();
  let created = h.orchestrator.get_instance(&id).unwrap();
  assert_eq!(created.state, InstanceState::Created);
  assert_eq!(created.current_nodes, vec!["A"]);

  h.orchestrator.start_instance(&id).unwrap();
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Completed);
  assert_eq!(instance.completed_nodes, vec!["A", "B"]);
  assert!(instance.current_nodes.is_empty());
  assert_eq!(instance.node_outputs["A"]["input"]["topic"], "graphs");
  assert_eq!(instance.node_outputs["B"], json!({ "from_a": 42 }));
  assert!(instance.completed_at.unwrap() >= instance.started_at.unwrap());
}

#[tokio::test]
async fn test_snapshots_never_overlap() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("fan", "Fan")
    .add_control_flow_node("fork", "Fork", NodeKind::Fork)
    .add_task("left", "Left", "slow", json!({}))
    .add_task("right", "Right", "echo", json!({}))
    .add_control_flow_node("join", "Join", NodeKind::Join)
    .add_task("end", "End", "echo", json!({}))
    .connect("fork", "left")
    .connect("fork", "right")
    .connect("left", "join")
    .connect("right", "join")
    .connect("join", "end")
    .set_end_nodes(["end"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = h.orchestrator.create_instance("fan", Map::new()).unwrap();
  let mut rx = h.orchestrator.subscribe(&id).unwrap();
  let watcher = tokio::spawn(async move {
    let mut observed = 0;
    loop {
      {
        let snapshot = rx.borrow_and_update();
        assert!(
          snapshot
            .current_nodes
            .iter()
            .all(|node| !snapshot.completed_nodes.contains(node)),
          "overlap in {snapshot:?}"
        );
        observed += 1;
        if snapshot.is_terminal() {
          return observed;
        }
      }
      if rx.changed().await.is_err() {
        return observed;
      }
    }
  });

  h.orchestrator.start_instance(&id).unwrap();
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();
  assert_eq!(instance.state, InstanceState::Completed);
  assert_eq!(instance.completed_nodes.len(), 5);
  assert_eq!(instance.completed_nodes.last().unwrap(), "end");
  assert!(watcher.await.unwrap() >= 1);
}

#[tokio::test]
async fn test_decision_routes_to_false_branch() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("route", "Route")
    .add_decision("check", "Check", Predicate::expression("priority == 'high'").unwrap())
    .add_task("branch1", "Branch 1", "echo", json!({ "branch": 1 }))
    .add_task("branch2", "Branch 2", "echo", json!({ "branch": 2 }))
    .connect_when("check", "branch1", Predicate::is_true())
    .connect_when("check", "branch2", Predicate::is_false())
    .set_end_nodes(["branch1", "branch2"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = run(&h.orchestrator, "route", json!({ "priority": "low" })).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Completed);
  assert_eq!(instance.node_outputs["check"], json!(false));
  assert!(instance.completed_nodes.contains(&"branch2".to_string()));
  assert!(!instance.completed_nodes.contains(&"branch1".to_string()));
}

#[tokio::test]
async fn test_join_with_routed_away_parent_fails() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("stall", "Stall")
    .add_decision("check", "Check", Predicate::new(|_| false))
    .add_task("a", "A", "echo", json!({}))
    .add_task("b", "B", "echo", json!({}))
    .add_control_flow_node("join", "Join", NodeKind::Join)
    .add_task("end", "End", "echo", json!({}))
    .connect_when("check", "a", Predicate::is_true())
    .connect_when("check", "b", Predicate::is_false())
    .connect("a", "join")
    .connect("b", "join")
    .connect("join", "end")
    .set_end_nodes(["end"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = run(&h.orchestrator, "stall", json!({})).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Failed);
  assert_eq!(instance.current_nodes, vec!["join"]);
  assert!(instance.error.unwrap().contains("no progress"));
}

#[tokio::test]
async fn test_task_failure_fails_instance() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "fail"))
    .unwrap();

  let id = run(&h.orchestrator, "wf", json!({})).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Failed);
  assert!(instance.completed_nodes.is_empty());
  let error = instance.error.unwrap();
  assert!(error.contains("'A'"));
  assert!(error.contains("upstream exploded"));
}

#[tokio::test]
async fn test_continue_on_failure_records_output() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("tolerant", "Tolerant")
    .add_task("A", "A", "fail", json!({}))
    .add_task("B", "B", "echo", json!({ "ok": "{{ nodes.A.success }}" }))
    .continue_on_failure("A")
    .connect("A", "B")
    .set_end_nodes(["B"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = run(&h.orchestrator, "tolerant", json!({})).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Completed);
  assert_eq!(
    instance.node_outputs["A"],
    json!({ "success": false, "error": "upstream exploded" })
  );
  assert_eq!(instance.node_outputs["B"], json!({ "ok": false }));
}

#[tokio::test]
async fn test_unregistered_capability_fails_instance() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "missing"))
    .unwrap();

  let id = run(&h.orchestrator, "wf", json!({})).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Failed);
  assert!(instance.error.unwrap().contains("capability not registered"));
}

#[tokio::test]
async fn test_pause_waits_for_in_flight_node_then_resumes() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("pausable", "Pausable")
    .add_task("A", "A", "slow", json!({}))
    .add_task("B", "B", "slow", json!({}))
    .connect("A", "B")
    .set_end_nodes(["B"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = run(&h.orchestrator, "pausable", json!({})).await;
  tokio::time::sleep(Duration::from_millis(20)).await;

  let state = h.orchestrator.pause_instance(&id).await.unwrap();
  assert_eq!(state, InstanceState::Paused);

  let paused = h.orchestrator.get_instance(&id).unwrap();
  assert_eq!(paused.completed_nodes, vec!["A"]);
  assert_eq!(paused.current_nodes, vec!["B"]);
  assert_eq!(h.slow_runs.load(Ordering::SeqCst), 1);

  // Still paused after a while; nothing else runs
  tokio::time::sleep(Duration::from_millis(150)).await;
  assert_eq!(h.slow_runs.load(Ordering::SeqCst), 1);
  assert!(matches!(
    h.orchestrator.wait_for_instance(&id, Some(Duration::from_millis(10))).await,
    Err(OrchestratorError::Timeout { .. })
  ));

  h.orchestrator.resume_instance(&id).unwrap();
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();
  assert_eq!(instance.state, InstanceState::Completed);
  assert_eq!(instance.completed_nodes, vec!["A", "B"]);
  assert_eq!(h.slow_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_running_instance() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "slow"))
    .unwrap();

  let id = run(&h.orchestrator, "wf", json!({})).await;
  tokio::time::sleep(Duration::from_millis(20)).await;

  let state = h.orchestrator.cancel_instance(&id).await.unwrap();
  assert_eq!(state, InstanceState::Cancelled);

  let instance = h.orchestrator.get_instance(&id).unwrap();
  assert_eq!(instance.state, InstanceState::Cancelled);
  assert!(instance.completed_nodes.is_empty());
  assert!(instance.completed_at.is_some());

  // Terminal instances stay as they are
  assert_eq!(
    h.orchestrator.cancel_instance(&id).await.unwrap(),
    InstanceState::Cancelled
  );
  assert!(matches!(
    h.orchestrator.resume_instance(&id),
    Err(OrchestratorError::InvalidState { .. })
  ));
}

#[tokio::test]
async fn test_cancel_created_instance() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "echo"))
    .unwrap();

  let id = h.orchestrator.create_instance("wf", Map::new()).unwrap();
  assert_eq!(
    h.orchestrator.cancel_instance(&id).await.unwrap(),
    InstanceState::Cancelled
  );
  assert!(matches!(
    h.orchestrator.start_instance(&id),
    Err(OrchestratorError::InvalidState { operation: "start", .. })
  ));
}

#[tokio::test]
async fn test_start_twice_rejected() {
  let h = harness();
  h.orchestrator
    .register_definition(linear("wf", "slow"))
    .unwrap();

  let id = run(&h.orchestrator, "wf", json!({})).await;
  assert!(matches!(
    h.orchestrator.start_instance(&id),
    Err(OrchestratorError::InvalidState { .. })
  ));
  h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();
}

#[tokio::test]
async fn test_merge_continues_once() {
  let h = harness();
  let definition = WorkflowBuilder::create_workflow("merge", "Merge")
    .add_control_flow_node("fork", "Fork", NodeKind::Fork)
    .add_task("fast", "Fast", "echo", json!({}))
    .add_task("slower", "Slower", "slow", json!({}))
    .add_control_flow_node("merge", "Merge", NodeKind::Merge)
    .add_task("after", "After", "echo", json!({}))
    .connect("fork", "fast")
    .connect("fork", "slower")
    .connect("fast", "merge")
    .connect("slower", "merge")
    .connect("merge", "after")
    .set_end_nodes(["after"])
    .build()
    .unwrap();
  h.orchestrator.register_definition(definition).unwrap();

  let id = run(&h.orchestrator, "merge", json!({})).await;
  let instance = h.orchestrator.wait_for_instance(&id, WAIT).await.unwrap();

  assert_eq!(instance.state, InstanceState::Completed);
  let merges = instance
    .completed_nodes
    .iter()
    .filter(|node| *node == "merge")
    .count();
  assert_eq!(merges, 1);
  assert_eq!(
    instance.node_outputs["merge"],
    json!({ "status": "completed", "node_type": "merge" })
  );
}
