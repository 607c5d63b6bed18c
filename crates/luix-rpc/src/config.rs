//! Aggregated RPC configuration
//!
//! Loaded from YAML or JSON. Every field except the application id and the
//! protocol name has a default, so a minimal file only names the application
//! and the registries.

use crate::error::{Error, Result};
use luix_registry::{
    RegistryConfig, Url,
    url::{DEFAULT_PROTOCOL, keys},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default serializer name
pub const DEFAULT_SERIALIZER: &str = crate::serializer::JSON;
/// Default codec name
pub const DEFAULT_CODEC: &str = crate::codec::LUIX;
/// Default maximum body size in bytes
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 8 * 1024 * 1024;
/// Default maximum concurrent server connections
pub const DEFAULT_MAX_SERVER_CONNECTIONS: usize = 1000;
/// Default server worker count
pub const DEFAULT_MAX_THREADS: usize = 16;
/// Default server work queue bound
pub const DEFAULT_WORK_QUEUE_SIZE: usize = 1024;
/// Default request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1_000;
/// Default retry count for failover
pub const DEFAULT_RETRY_COUNT: u64 = 0;
/// Default health checker name
pub const DEFAULT_HEALTH_CHECKER: &str = crate::server::health::DEFAULT;
/// Default fault tolerance strategy
pub const DEFAULT_FAULT_TOLERANCE: &str = crate::cluster::tolerance::FAILOVER;
/// Default load balancer
pub const DEFAULT_LOAD_BALANCER: &str = crate::cluster::balance::RANDOM;

/// Application identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application id, attached to every URL
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
}

/// Wire protocol and server sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Protocol name, also the endpoint factory name
    #[serde(default = "default_protocol")]
    pub name: String,
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port; `0` picks a free port
    #[serde(default)]
    pub port: u16,
    /// Serializer name
    #[serde(default = "default_serializer")]
    pub serializer: String,
    /// Codec name
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Whether providers on the same address share one server
    #[serde(default = "default_true")]
    pub shared_channel: bool,
    /// Maximum body size in bytes
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Maximum concurrent server connections
    #[serde(default = "default_max_server_connections")]
    pub max_server_connections: usize,
    /// Minimum server workers
    #[serde(default = "default_min_threads")]
    pub min_threads: usize,
    /// Maximum server workers
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Bound of the server work queue
    #[serde(default = "default_work_queue_size")]
    pub work_queue_size: usize,
    /// Whether failed calls raise errors instead of returning zero values
    #[serde(default = "default_true")]
    pub throw_exception: bool,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default)]
    pub retry_count: u64,
}

/// Provider side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Health checker name (`default` or `none`)
    #[serde(default = "default_health_checker")]
    pub health_checker: String,
    /// Whether providers are exposed on startup
    #[serde(default = "default_true")]
    pub auto_expose: bool,
}

/// Consumer side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Invoker (endpoint factory) name; the protocol name when empty
    #[serde(default)]
    pub invoker: String,
    /// Fault tolerance strategy name
    #[serde(default = "default_fault_tolerance")]
    pub fault_tolerance: String,
    /// Load balancer name
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,
    /// Whether stubs are rate limited
    #[serde(default)]
    pub rate_limit_enabled: bool,
    /// Permits per second when rate limited
    #[serde(default = "default_rate_limit_permits_per_second")]
    pub rate_limit_permits_per_second: f64,
}

/// Everything needed to expose providers and build consumer stubs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LuixConfig {
    /// Application identity
    pub application: ApplicationConfig,
    /// Protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Registries to register with and discover from
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
    /// Provider settings
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_serializer() -> String {
    DEFAULT_SERIALIZER.to_string()
}

fn default_codec() -> String {
    DEFAULT_CODEC.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

fn default_max_server_connections() -> usize {
    DEFAULT_MAX_SERVER_CONNECTIONS
}

fn default_min_threads() -> usize {
    1
}

fn default_max_threads() -> usize {
    DEFAULT_MAX_THREADS
}

fn default_work_queue_size() -> usize {
    DEFAULT_WORK_QUEUE_SIZE
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_health_checker() -> String {
    DEFAULT_HEALTH_CHECKER.to_string()
}

fn default_fault_tolerance() -> String {
    DEFAULT_FAULT_TOLERANCE.to_string()
}

fn default_load_balancer() -> String {
    DEFAULT_LOAD_BALANCER.to_string()
}

fn default_rate_limit_permits_per_second() -> f64 {
    100.0
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: default_protocol(),
            host: default_host(),
            port: 0,
            serializer: default_serializer(),
            codec: default_codec(),
            shared_channel: true,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_server_connections: DEFAULT_MAX_SERVER_CONNECTIONS,
            min_threads: default_min_threads(),
            max_threads: DEFAULT_MAX_THREADS,
            work_queue_size: DEFAULT_WORK_QUEUE_SIZE,
            throw_exception: true,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            health_checker: default_health_checker(),
            auto_expose: true,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            invoker: String::new(),
            fault_tolerance: default_fault_tolerance(),
            load_balancer: default_load_balancer(),
            rate_limit_enabled: false,
            rate_limit_permits_per_second: default_rate_limit_permits_per_second(),
        }
    }
}

impl ProtocolConfig {
    /// Provider URL for an interface, carrying every server option
    pub fn provider_url(&self, app: &str, path: &str, health_checker: &str) -> Url {
        Url::provider(self.name.clone(), self.host.clone(), self.port, path)
            .with_option(keys::APP, app)
            .with_option(keys::SERIALIZER, self.serializer.clone())
            .with_option(keys::CODEC, self.codec.clone())
            .with_option(keys::SHARED_CHANNEL, self.shared_channel.to_string())
            .with_option(keys::MAX_PAYLOAD, self.max_content_length.to_string())
            .with_option(
                keys::MAX_SERVER_CONNECTIONS,
                self.max_server_connections.to_string(),
            )
            .with_option(keys::MAX_THREADS, self.max_threads.to_string())
            .with_option(keys::WORK_QUEUE_SIZE, self.work_queue_size.to_string())
            .with_option(keys::HEALTH_CHECKER, health_checker)
    }
}

impl LuixConfig {
    /// Configuration with defaults for an application
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application: ApplicationConfig {
                id: application_id.into(),
                name: String::new(),
            },
            protocol: ProtocolConfig::default(),
            registries: Vec::new(),
            provider: ProviderConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }

    /// Load configuration from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .map_err(|e| Error::configuration(format!("{}: {}", path.display(), e)))?,
            _ => serde_json::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check required properties
    pub fn validate(&self) -> Result<()> {
        if self.application.id.trim().is_empty() {
            return Err(Error::configuration("application id is required"));
        }
        if self.protocol.name.trim().is_empty() {
            return Err(Error::configuration("protocol name is required"));
        }
        if self.protocol.max_threads == 0 || self.protocol.work_queue_size == 0 {
            return Err(Error::configuration(
                "protocol max_threads and work_queue_size must be positive",
            ));
        }
        if self.protocol.min_threads > self.protocol.max_threads {
            return Err(Error::configuration(format!(
                "protocol min_threads ({}) exceeds max_threads ({})",
                self.protocol.min_threads, self.protocol.max_threads
            )));
        }
        for registry in &self.registries {
            registry.validate()?;
        }
        Ok(())
    }

    /// Endpoint factory used by consumers
    pub fn invoker_name(&self) -> &str {
        if self.consumer.invoker.is_empty() {
            &self.protocol.name
        } else {
            &self.consumer.invoker
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "application:\n  id: demo\nregistries:\n  - name: zookeeper\n    port: 2181\n"
        )
        .unwrap();

        let config = LuixConfig::from_file(file.path()).unwrap();
        assert_eq!(config.application.id, "demo");
        assert_eq!(config.protocol.name, DEFAULT_PROTOCOL);
        assert_eq!(config.protocol.serializer, DEFAULT_SERIALIZER);
        assert!(config.protocol.shared_channel);
        assert_eq!(config.registries.len(), 1);
        assert_eq!(config.registries[0].host, "127.0.0.1");
        assert_eq!(config.consumer.load_balancer, DEFAULT_LOAD_BALANCER);
        assert_eq!(config.invoker_name(), DEFAULT_PROTOCOL);
    }

    #[test]
    fn test_validation() {
        assert!(LuixConfig::new("demo").validate().is_ok());
        assert!(matches!(
            LuixConfig::new(" ").validate(),
            Err(Error::Configuration(_))
        ));

        let mut config = LuixConfig::new("demo");
        config.protocol.name.clear();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_provider_url_options() {
        let mut protocol = ProtocolConfig::default();
        protocol.port = 8001;
        let url = protocol.provider_url("demo", "com.foo.Svc", "default");

        assert!(url.is_provider());
        assert_eq!(url.address(), "127.0.0.1:8001");
        assert_eq!(url.option(keys::SERIALIZER), Some("json"));
        assert_eq!(url.option(keys::CODEC), Some("luix"));
        assert_eq!(url.option(keys::HEALTH_CHECKER), Some("default"));
        assert!(url.option_bool(keys::SHARED_CHANNEL, false));
    }
}
