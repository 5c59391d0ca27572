//! Miner configuration
//!
//! Loaded from a TOML file with `[api]`, `[mining]` and `[storage]` tables.
//! Every key is optional:
//!
//! ```toml
//! [api]
//! api_url = "https://api.scavenger-mine.com"
//!
//! [mining]
//! batch_concurrency = 3
//! challenge_retry_secs = 5
//!
//! [storage]
//! identities_path = "/var/lib/scavenger/identities.json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::rpc::ApiConfig;
use crate::worker::WorkerSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub api: ApiConfig,
    pub mining: MiningConfig,
    pub storage: StorageConfig,
}

impl MinerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Identities handled at once by batch operations
    pub batch_concurrency: usize,
    pub challenge_retry_secs: u64,
    pub solution_delay_ms: u64,
    pub progress_interval_ms: u64,
    /// Advisory thread count recorded for each mining identity
    pub threads: Option<usize>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 3,
            challenge_retry_secs: 5,
            solution_delay_ms: 1000,
            progress_interval_ms: 1000,
            threads: None,
        }
    }
}

impl MiningConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            challenge_retry_delay: Duration::from_secs(self.challenge_retry_secs),
            solution_delay: Duration::from_millis(self.solution_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub identities_path: PathBuf,
    pub wallets_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            identities_path: dir.join("identities.json"),
            wallets_path: dir.join("wallets.json"),
        }
    }
}

/// Get the default data directory (~/.scavenger)
#[cfg(feature = "cli")]
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scavenger")
}

#[cfg(not(feature = "cli"))]
pub fn default_data_dir() -> PathBuf {
    PathBuf::from(".scavenger")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}
