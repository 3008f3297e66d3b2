// Table Configuration
//
// Tunables for the write path, loadable from JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Compression applied to data file column chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    Uncompressed,
    Snappy,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Commit attempts before giving up with a contention error.
    pub max_commit_attempts: u32,

    /// Write a checkpoint every N versions. 0 disables checkpoints.
    pub checkpoint_interval: u64,

    /// Upper bound on rows per data file.
    pub max_rows_per_file: usize,

    pub compression: CompressionCodec,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 10,
            checkpoint_interval: 10,
            max_rows_per_file: 1_000_000,
            compression: CompressionCodec::Snappy,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl TableConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TableConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_commit_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_commit_attempts must be at least 1".into(),
            ));
        }
        if self.max_rows_per_file == 0 {
            return Err(ConfigError::Invalid(
                "max_rows_per_file must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
