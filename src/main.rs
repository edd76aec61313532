use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use braid_config::{Settings, WorkflowDef};
use braid_orchestrator::{WorkflowInstance, WorkflowOrchestrator};
use braid_task::{TaskLifecycleManager, TaskOutcome, executor_fn};
use braid_workflow::WorkflowDefinition;

/// Braid - DAG workflows over capability-routed task agents
#[derive(Parser)]
#[command(name = "braid")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the settings file (default: ~/.braid/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log filter, e.g. `debug` or `braid_task=trace` (overrides RUST_LOG)
  #[arg(long, global = true)]
  log_level: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow file without running it
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow with echo executors for every capability
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Initial context as a JSON object (default: read from stdin)
    #[arg(long)]
    context: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.log_level.as_deref());

  match cli.command {
    Some(Commands::Validate { workflow_file }) => {
      let definition = load_definition(&workflow_file)?;
      println!(
        "{}: {} nodes, {} edges, capabilities {:?}",
        definition.id,
        definition.nodes.len(),
        definition.edges.len(),
        definition.capabilities()
      );
    }
    Some(Commands::Run {
      workflow_file,
      context,
    }) => {
      let settings = load_settings(cli.config)?;
      let context = match context {
        Some(raw) => parse_context(&raw)?,
        None => read_context_from_stdin()?,
      };
      let rt = tokio::runtime::Runtime::new()?;
      let instance = rt.block_on(run_workflow(&workflow_file, context, settings))?;
      println!("{}", serde_json::to_string_pretty(&instance)?);
    }
    None => {
      println!("braid - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(level: Option<&str>) {
  let filter = match level {
    Some(level) => EnvFilter::new(level),
    None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
  let path = match path {
    Some(path) => path,
    None => match dirs::home_dir() {
      Some(home) => home.join(".braid").join("config.json"),
      None => return Ok(Settings::default()),
    },
  };
  Settings::load_or_default(&path)
    .with_context(|| format!("failed to load settings: {}", path.display()))
}

fn load_definition(workflow_file: &Path) -> Result<WorkflowDefinition> {
  let def = WorkflowDef::load(workflow_file)
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))?;
  let workflow_id = def.workflow_id.clone();
  WorkflowDefinition::try_from(def).with_context(|| format!("invalid workflow '{workflow_id}'"))
}

/// Run a workflow file to completion. Every capability it references is
/// served by an executor that echoes its input back.
async fn run_workflow(
  workflow_file: &Path,
  context: Map<String, Value>,
  settings: Settings,
) -> Result<WorkflowInstance> {
  let definition = load_definition(workflow_file)?;
  let workflow_id = definition.id.clone();

  let lifecycle = Arc::new(TaskLifecycleManager::new(settings.lifecycle));
  for capability in definition.capabilities() {
    let name = capability.clone();
    let executor = executor_fn(move |input: Value, _cancel| {
      let name = name.clone();
      async move { Ok(TaskOutcome::ok(json!({ "capability": name, "input": input }))) }
    });
    lifecycle
      .register_capability(capability.as_str(), executor)
      .with_context(|| format!("failed to register capability '{capability}'"))?;
  }

  let orchestrator = WorkflowOrchestrator::new(lifecycle.clone(), settings.orchestrator);
  orchestrator.register_definition(definition)?;
  let instance_id = orchestrator.create_instance(&workflow_id, context)?;
  info!(instance_id = %instance_id, workflow_id = %workflow_id, "running workflow");

  orchestrator.start_instance(&instance_id)?;
  let instance = orchestrator.wait_for_instance(&instance_id, None).await?;

  orchestrator.shutdown().await;
  lifecycle.shutdown();
  Ok(instance)
}

fn parse_context(raw: &str) -> Result<Map<String, Value>> {
  match serde_json::from_str::<Value>(raw).context("failed to parse context JSON")? {
    Value::Object(map) => Ok(map),
    other => bail!("context must be a JSON object, got {other}"),
  }
}

fn read_context_from_stdin() -> Result<Map<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read context from stdin")?;

  if input.trim().is_empty() {
    Ok(Map::new())
  } else {
    parse_context(&input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use braid_orchestrator::InstanceState;

  const WORKFLOW: &str = r#"{
    "workflow_id": "greet",
    "name": "Greeting",
    "end_nodes": ["shout"],
    "nodes": [
      { "node_id": "hello", "type": "task", "capability": "text", "input": { "who": "{{ user }}" } },
      { "node_id": "shout", "type": "task", "capability": "upper", "input": "{{ nodes.hello }}" }
    ],
    "edges": [{ "from": "hello", "to": "shout" }]
  }"#;

  fn workflow_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_parse_context_requires_object() {
    let map = parse_context(r#"{"user": "ada"}"#).unwrap();
    assert_eq!(map["user"], json!("ada"));
    assert!(parse_context("[1, 2]").is_err());
    assert!(parse_context("not json").is_err());
  }

  #[test]
  fn test_load_definition_rejects_unknown_end_node() {
    let file = workflow_file(
      r#"{
        "workflow_id": "broken",
        "name": "Broken",
        "end_nodes": ["nowhere"],
        "nodes": [{ "node_id": "a", "type": "join" }]
      }"#,
    );
    let err = load_definition(file.path()).unwrap_err();
    assert!(err.to_string().contains("broken"));
  }

  #[tokio::test]
  async fn test_run_workflow_with_echo_executors() {
    let file = workflow_file(WORKFLOW);
    let context = parse_context(r#"{"user": "ada"}"#).unwrap();

    let instance = run_workflow(file.path(), context, Settings::default())
      .await
      .unwrap();

    assert_eq!(instance.state, InstanceState::Completed);
    assert_eq!(
      instance.node_outputs["hello"],
      json!({ "capability": "text", "input": { "who": "ada" } })
    );
    assert_eq!(
      instance.node_outputs["shout"],
      json!({
        "capability": "upper",
        "input": { "capability": "text", "input": { "who": "ada" } },
      })
    );
  }
}
