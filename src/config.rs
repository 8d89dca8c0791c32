//! Node configuration loaded from TOML
//!
//! Every field has a default, so an empty file (or no file) yields a usable
//! in-memory node. Durations are written in milliseconds.

use crate::mesh::codec::PacketCodec;
use crate::mesh::fragment::FRAGMENT_HEADER_LEN;
use crate::mesh::{DEFAULT_MAX_DEDUP_ENTRIES, DEFAULT_MTU, DEFAULT_TTL};
use crate::queue::{QueueConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Identifier this device uses as mesh source id
    pub node_id: String,
    pub mesh: MeshConfig,
    pub queue: QueueSettings,
    pub dispatch: DispatchConfig,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            mesh: MeshConfig::default(),
            queue: QueueSettings::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub mtu: usize,
    pub default_ttl: u8,
    pub dedup_window_ms: u64,
    pub max_dedup_entries: usize,
    pub max_pending_fragment_groups: usize,
    /// Rebroadcasts allowed per second
    pub relay_rate_per_sec: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            default_ttl: DEFAULT_TTL,
            dedup_window_ms: 60_000,
            max_dedup_entries: DEFAULT_MAX_DEDUP_ENTRIES,
            max_pending_fragment_groups: 64,
            relay_rate_per_sec: 20,
        }
    }
}

impl MeshConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// SQLite file; `None` keeps the queue in memory
    pub database_path: Option<PathBuf>,
    pub max_entries: usize,
    pub max_dead_letters: usize,
    pub default_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_multiplier: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            max_entries: 1000,
            max_dead_letters: 500,
            default_max_attempts: 5,
            retry_initial_ms: 1_000,
            retry_max_ms: 300_000,
            retry_multiplier: 2.0,
        }
    }
}

impl QueueSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
            self.retry_multiplier,
        )
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_max_entries(self.max_entries)
            .with_max_dead_letters(self.max_dead_letters)
            .with_max_attempts(self.default_max_attempts)
            .with_retry(self.retry_policy())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Entries claimed per flush
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            flush_interval_ms: 5_000,
            send_timeout_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl BeaconConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: BeaconConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.node_id.len() > u8::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "node_id is {} bytes (max {})",
                self.node_id.len(),
                u8::MAX
            )));
        }

        let min_mtu = PacketCodec::header_len(&self.node_id, None) + FRAGMENT_HEADER_LEN + 1;
        if self.mesh.mtu < min_mtu {
            return Err(ConfigError::Invalid(format!(
                "mesh.mtu {} is too small for a fragment from this node (min {})",
                self.mesh.mtu, min_mtu
            )));
        }
        if self.mesh.dedup_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "mesh.dedup_window_ms must be greater than zero".into(),
            ));
        }
        if self.mesh.max_dedup_entries == 0 {
            return Err(ConfigError::Invalid(
                "mesh.max_dedup_entries must be greater than zero".into(),
            ));
        }
        if self.mesh.relay_rate_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "mesh.relay_rate_per_sec must be greater than zero".into(),
            ));
        }
        if self.queue.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_entries must be greater than zero".into(),
            ));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.default_max_attempts must be greater than zero".into(),
            ));
        }
        if self.queue.retry_multiplier < 1.0 || !self.queue.retry_multiplier.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "queue.retry_multiplier must be at least 1.0, got {}",
                self.queue.retry_multiplier
            )));
        }
        if self.queue.retry_max_ms < self.queue.retry_initial_ms {
            return Err(ConfigError::Invalid(
                "queue.retry_max_ms must not be below queue.retry_initial_ms".into(),
            ));
        }
        if self.dispatch.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.batch_size must be greater than zero".into(),
            ));
        }
        if self.dispatch.flush_interval_ms == 0 || self.dispatch.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
