//! Relay configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::ServiceAddress;

/// Window in which a repeated fingerprint is suppressed.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Window over which the attempt rate is measured.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Interval between purges of throttle state.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Age after which throttle entries are purged.
pub const RETENTION_HORIZON: Duration = Duration::from_secs(10 * 60);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: ListenAddr,
    pub storage: StorageConfig,
    pub throttle: ThrottleConfig,
    pub summary: SummaryConfig,
    pub dispatch: DispatchConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ListenAddr(pub String);

impl Default for ListenAddr {
    fn default() -> Self {
        Self("0.0.0.0:8080".to_string())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "push-relay.db".to_string(),
            pool_size: 10,
            connection_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub max_pushes_per_second: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_pushes_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub include_last_sender: bool,
    pub include_last_message_body: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_last_sender: false,
            include_last_message_body: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Skip pushing while the owner has an attached connection.
    pub skip_when_present: bool,
    pub delivery_timeout_secs: u64,
}

impl DispatchConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            skip_when_present: false,
            delivery_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub apns: Option<ApnsConfig>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApnsConfig {
    /// Service address registrations use to name this gateway.
    pub service: ServiceAddress,
    pub pkcs12_path: PathBuf,
    pub password: String,
    pub topic: String,
    #[serde(default)]
    pub sandbox: bool,
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Config path from `PUSH_RELAY_CONFIG`, or `push-relay.toml`.
    pub fn config_path() -> PathBuf {
        std::env::var_os("PUSH_RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("push-relay.toml"))
    }
}
