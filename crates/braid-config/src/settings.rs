//! Runtime settings.
//!
//! Every field has a default so a partial (or empty) JSON document is valid:
//!
//! ```json
//! {
//!   "lifecycle": { "agents_per_capability": 2 },
//!   "scheduler": { "heartbeat_interval_ms": 5000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub lifecycle: LifecycleSettings,
  pub orchestrator: OrchestratorSettings,
  pub scheduler: SchedulerSettings,
}

/// Settings for agent pools created by the task lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
  /// Number of agents created per registered capability.
  pub agents_per_capability: usize,
  /// Semaphore size of each agent.
  pub max_concurrent_tasks: usize,
}

impl Default for LifecycleSettings {
  fn default() -> Self {
    Self {
      agents_per_capability: 3,
      max_concurrent_tasks: 5,
    }
  }
}

/// Settings for workflow instance execution loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
  /// Consecutive cycles without progress before an instance is failed.
  pub stall_limit: u32,
  /// Delay between stalled cycles.
  pub stall_backoff_ms: u64,
}

impl Default for OrchestratorSettings {
  fn default() -> Self {
    Self {
      stall_limit: 50,
      stall_backoff_ms: 100,
    }
  }
}

impl OrchestratorSettings {
  pub fn stall_backoff(&self) -> Duration {
    Duration::from_millis(self.stall_backoff_ms)
  }
}

/// Settings for the distributed task scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
  /// Period of the assignment + liveness tick.
  pub tick_interval_ms: u64,
  /// Expected heartbeat period; a worker silent for twice this long is offline.
  pub heartbeat_interval_ms: u64,
  /// Load added to a worker per assigned task (and removed on completion).
  pub load_increment: f64,
}

impl Default for SchedulerSettings {
  fn default() -> Self {
    Self {
      tick_interval_ms: 1000,
      heartbeat_interval_ms: 30_000,
      load_increment: 0.1,
    }
  }
}

impl SchedulerSettings {
  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.tick_interval_ms)
  }

  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_millis(self.heartbeat_interval_ms)
  }

  /// Silence after which a worker is considered offline.
  pub fn offline_after(&self) -> Duration {
    self.heartbeat_interval() * 2
  }
}

impl Settings {
  /// Load settings from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let settings: Settings =
      serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?;
    settings.validate()?;
    Ok(settings)
  }

  /// Load settings from a JSON file, falling back to defaults if it does not exist.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      Ok(Self::default())
    }
  }

  /// Check value ranges.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.lifecycle.agents_per_capability == 0 {
      return Err(invalid("lifecycle.agents_per_capability", "must be at least 1"));
    }
    if self.lifecycle.max_concurrent_tasks == 0 {
      return Err(invalid("lifecycle.max_concurrent_tasks", "must be at least 1"));
    }
    if self.orchestrator.stall_limit == 0 {
      return Err(invalid("orchestrator.stall_limit", "must be at least 1"));
    }
    if self.scheduler.tick_interval_ms == 0 {
      return Err(invalid("scheduler.tick_interval_ms", "must be positive"));
    }
    if !(0.0..=1.0).contains(&self.scheduler.load_increment) {
      return Err(invalid("scheduler.load_increment", "must be within [0, 1]"));
    }
    Ok(())
  }
}

fn invalid(key: &str, message: &str) -> ConfigError {
  ConfigError::Invalid {
    key: key.to_string(),
    message: message.to_string(),
  }
}
