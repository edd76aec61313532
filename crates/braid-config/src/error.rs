//! Configuration errors.

use std::path::PathBuf;

/// Errors that can occur while loading configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The file could not be read.
  #[error("failed to read '{path}'")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The file contents are not valid for the expected type.
  #[error("failed to parse '{path}'")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// A value is outside its allowed range.
  #[error("invalid setting '{key}': {message}")]
  Invalid { key: String, message: String },
}
