//! Configuration loading for sync-client.
//!
//! Configuration is loaded from a TOML file (default: `proper.toml`). Every
//! section and key is optional; missing values fall back to the defaults
//! shown below.
//!
//! ```toml
//! [connection]
//! server = "ws://shark-nyc1.transio.us:8080/ws"
//! realm = "realm1"
//! serializations = ["msgpack", "json"]
//! max_connect_attempts = 5
//! call_timeout_secs = 10
//!
//! [models]
//! apply_retries = 3
//!
//! [agency]
//! key = "citybus"
//! name = "CityBus"
//! time_resolution_secs = 60
//! ```

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::RetryPolicy;
use sync_types::Serialization;

/// Root configuration for sync-client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Router connection configuration.
    pub connection: ConnectionConfig,
    /// Mutable model configuration.
    pub models: ModelsConfig,
    /// Agency configuration.
    pub agency: AgencyConfig,
}

/// Router connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the WAMP router.
    #[serde(default = "default_server")]
    pub server: String,
    /// WAMP realm to join (default: realm1).
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Serializations offered to the router, in order of preference.
    #[serde(default = "default_serializations")]
    pub serializations: Vec<Serialization>,
    /// Connect attempts before giving up, counting the first (default: 5).
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Per-call deadline in seconds (default: 10).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Reconnect after an unexpected session loss (default: false).
    #[serde(default)]
    pub reconnect_on_loss: bool,
    /// First retry delay in milliseconds (default: 500).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds (default: 30000).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Random jitter added to retry delays, in milliseconds (default: 1000).
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
}

/// Mutable model configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Retries of a failed synchronization step before giving up (default: 3).
    #[serde(default = "default_apply_retries")]
    pub apply_retries: u32,
}

/// Agency configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyConfig {
    /// Agency key on the backend.
    #[serde(default = "default_agency_key")]
    pub key: String,
    /// Display name.
    #[serde(default = "default_agency_name")]
    pub name: String,
    /// Arrival lifecycle resolution in seconds (default: 60).
    #[serde(default = "default_time_resolution_secs")]
    pub time_resolution_secs: u64,
}

// Default value functions
fn default_server() -> String {
    "ws://shark-nyc1.transio.us:8080/ws".to_string()
}

fn default_realm() -> String {
    "realm1".to_string()
}

fn default_serializations() -> Vec<Serialization> {
    vec![Serialization::MsgPack, Serialization::Json]
}

fn default_max_connect_attempts() -> u32 {
    5
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_apply_retries() -> u32 {
    3
}

fn default_agency_key() -> String {
    "citybus".to_string()
}

fn default_agency_name() -> String {
    "CityBus".to_string()
}

fn default_time_resolution_secs() -> u64 {
    60
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            realm: default_realm(),
            serializations: default_serializations(),
            max_connect_attempts: default_max_connect_attempts(),
            call_timeout_secs: default_call_timeout_secs(),
            reconnect_on_loss: false,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            apply_retries: default_apply_retries(),
        }
    }
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            key: default_agency_key(),
            name: default_agency_name(),
            time_resolution_secs: default_time_resolution_secs(),
        }
    }
}

impl ConnectionConfig {
    /// Retry policy for the session state machine.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_connect_attempts.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: Duration::from_millis(self.backoff_jitter_ms),
            reconnect_on_loss: self.reconnect_on_loss,
        }
    }

    /// Per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl AgencyConfig {
    /// Arrival lifecycle resolution.
    pub fn time_resolution(&self) -> Duration {
        Duration::from_secs(self.time_resolution_secs)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
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
}
