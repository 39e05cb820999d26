//! Configuration loading for sync-client.
//!
//! Configuration is loaded from a TOML file (default: `novaclub.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use novaclub_sync_types::EntityType;

/// Root configuration for the offline client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Remote service configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Local store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Sync cycle configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Connectivity probe configuration.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

/// Remote service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL, including the version prefix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database; relative paths live in the data directory.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Sync cycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Background cycle interval in seconds (default: 30).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Explicit rejections before a queued mutation is dead-lettered (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Entity types pulled on every cycle.
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Health endpoint, resolved against the server root (default: /health).
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Probe interval in seconds (default: 15).
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Enable the probe task (default: true).
    #[serde(default = "default_probe_enabled")]
    pub probe_enabled: bool,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("novaclub.db")
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    novaclub_sync_core::DEFAULT_MAX_ATTEMPTS
}

fn default_entity_types() -> Vec<String> {
    EntityType::DEFAULTS.iter().map(|s| s.to_string()).collect()
}

fn default_probe_path() -> String {
    "/health".to_string()
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_probe_enabled() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            entity_types: default_entity_types(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_path: default_probe_path(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_enabled: default_probe_enabled(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render as TOML (used to write a starter file).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Validated entity types.
    pub fn entity_types(&self) -> Result<Vec<EntityType>, ConfigError> {
        if self.sync.entity_types.is_empty() {
            return Err(ConfigError::Invalid(
                "sync.entity_types must not be empty".into(),
            ));
        }
        self.sync
            .entity_types
            .iter()
            .map(|name| {
                EntityType::new(name)
                    .map_err(|e| ConfigError::Invalid(format!("sync.entity_types: {}", e)))
            })
            .collect()
    }

    /// Background cycle interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs.max(1))
    }

    /// Probe interval.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity.probe_interval_secs.max(1))
    }
}

impl StorageConfig {
    /// Database path, with relative paths placed in `data_dir`.
    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            data_dir.join(&self.database)
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
