//! Registry configuration

use crate::error::{Error, Result};
use crate::notify::{DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS};
use crate::url::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and timing settings of one registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Backend strategy name, e.g. `zookeeper` or `consul`
    pub name: String,
    /// Registry host
    #[serde(default = "default_host")]
    pub host: String,
    /// Registry port
    #[serde(default)]
    pub port: u16,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Delay before retrying a failed poll, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Interval between discovery polls, in milliseconds
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    /// Interval between TTL heartbeats, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Number of notification workers
    #[serde(default = "default_notification_workers")]
    pub notification_workers: usize,
    /// Bound of the notification queue
    #[serde(default = "default_notification_queue_size")]
    pub notification_queue_size: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_session_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_discovery_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    3_000
}

fn default_notification_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_notification_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

impl RegistryConfig {
    /// Create a configuration with default timings
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            session_timeout_ms: default_session_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            discovery_interval_ms: default_discovery_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            notification_workers: default_notification_workers(),
            notification_queue_size: default_notification_queue_size(),
        }
    }

    /// Load configuration from a YAML or JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check required properties
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("registry name is required"));
        }
        if self.host.trim().is_empty() {
            return Err(Error::configuration(format!(
                "registry '{}' requires a host",
                self.name
            )));
        }
        Ok(())
    }

    /// URL identifying this registry
    pub fn to_url(&self) -> Url {
        Url::new(self.name.clone(), self.host.clone(), self.port, "")
            .with_option("sessionTimeout", self.session_timeout_ms.to_string())
            .with_option("connectTimeout", self.connect_timeout_ms.to_string())
    }

    /// Retry interval as a duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Discovery interval as a duration
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
