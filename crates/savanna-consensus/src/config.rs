use crate::error::ConsensusError;
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration for the finality engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Directory holding the fork database file and the vote safety file.
    pub data_dir: PathBuf,
    pub fork_db_filename: String,
    pub safety_filename: String,
    /// Upper bound on concurrently tracked per-block vote tallies; votes for
    /// blocks beyond the cap are dropped with a busy indication.
    pub max_pending_blocks: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("savanna-data"),
            fork_db_filename: "fork_db.dat".to_string(),
            safety_filename: "finalizer_safety.json".to_string(),
            max_pending_blocks: 1000,
        }
    }
}

impl ConsensusConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConsensusError> {
        toml::from_str(s).map_err(|e| ConsensusError::Config(e.to_string()))
    }

    pub fn fork_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.fork_db_filename)
    }

    pub fn safety_path(&self) -> PathBuf {
        self.data_dir.join(&self.safety_filename)
    }
}
