//! Endpoint URL value type
//!
//! Every provider, consumer and registry endpoint is described by a [`Url`]:
//! `protocol://host:port/path?key=value&...`. Equality and hashing only look
//! at the identity components (protocol, host, port, path, form, version) so
//! that option changes never fragment caches keyed by URL.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Default RPC protocol name
pub const DEFAULT_PROTOCOL: &str = "luix";

/// Protocol used by synthetic registry URLs in direct-connect mode
pub const NONE_PROTOCOL: &str = "none";

/// Protocol that always classifies a URL as a consumer
pub const CONSUMER_PROTOCOL: &str = "consumer";

/// Option keys shared by providers, consumers and registries
pub mod keys {
    /// Application id
    pub const APP: &str = "app";
    /// Endpoint role (`provider` or `consumer`)
    pub const TYPE: &str = "type";
    /// Service form (group)
    pub const FORM: &str = "form";
    /// Service version
    pub const VERSION: &str = "version";
    /// Serializer strategy name
    pub const SERIALIZER: &str = "serializer";
    /// Codec strategy name, never persisted in a registry
    pub const CODEC: &str = "codec";
    /// Request timeout in milliseconds
    pub const REQUEST_TIMEOUT: &str = "requestTimeout";
    /// Retry count on transient failures
    pub const RETRY_COUNT: &str = "retryCount";
    /// Maximum payload size in bytes
    pub const MAX_PAYLOAD: &str = "maxPayload";
    /// Throw on failed calls instead of returning a default value
    pub const THROW_EXCEPTION: &str = "throwException";
    /// Whether a provider may share a listening socket
    pub const SHARED_CHANNEL: &str = "sharedChannel";
    /// Maximum accepted connections for a server
    pub const MAX_SERVER_CONNECTIONS: &str = "maxServerConnections";
    /// Maximum server worker threads
    pub const MAX_THREADS: &str = "maxThreads";
    /// Server work queue size
    pub const WORK_QUEUE_SIZE: &str = "workQueueSize";
    /// Health checker strategy name
    pub const HEALTH_CHECKER: &str = "healthChecker";
    /// Fault tolerance strategy name
    pub const FAULT_TOLERANCE: &str = "faultTolerance";
    /// Load balancer strategy name
    pub const LOAD_BALANCER: &str = "loadBalancer";
    /// Provider weight
    pub const WEIGHT: &str = "weight";
}

/// Endpoint role values for [`keys::TYPE`]
pub mod role {
    /// Provider role
    pub const PROVIDER: &str = "provider";
    /// Consumer role
    pub const CONSUMER: &str = "consumer";
}

/// Canonical service endpoint descriptor
///
/// Cloning produces a fully independent value; callers clone before
/// mutating a URL that was handed to a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    options: BTreeMap<String, String>,
}

impl Url {
    /// Create a URL without options
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            options: BTreeMap::new(),
        }
    }

    /// Create a provider URL
    pub fn provider(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self::new(protocol, host, port, path).with_option(keys::TYPE, role::PROVIDER)
    }

    /// Create a consumer URL
    pub fn consumer(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self::new(protocol, host, port, path).with_option(keys::TYPE, role::CONSUMER)
    }

    /// Parse `protocol://host:port/path?k=v&k2=v2`
    ///
    /// Option keys and values are percent-decoded; [`Display`](fmt::Display)
    /// encodes them, so values may contain `&`, `=` or `?`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidUrl(text.to_string());

        let (protocol, rest) = text.split_once("://").ok_or_else(invalid)?;
        if protocol.is_empty() {
            return Err(invalid());
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (location, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, 0),
        };

        let mut url = Self::new(protocol, host, port, path);
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).map_err(|_| invalid())?;
                let value = urlencoding::decode(value).map_err(|_| invalid())?;
                url.options.insert(key.into_owned(), value.into_owned());
            }
        }

        Ok(url)
    }

    /// Protocol name
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Host name or IP
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path, normally the service interface name
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service form, if any
    pub fn form(&self) -> Option<&str> {
        self.option(keys::FORM)
    }

    /// Service version, if any
    pub fn version(&self) -> Option<&str> {
        self.option(keys::VERSION)
    }

    /// All options
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Get an option value
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    /// Get an option value or a default
    pub fn option_or(&self, key: &str, default: &str) -> String {
        self.option(key).unwrap_or(default).to_string()
    }

    /// Get a boolean option, falling back to `default` when absent or malformed
    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.option(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get an unsigned option, falling back to `default` when absent or malformed
    pub fn option_u64(&self, key: &str, default: u64) -> u64 {
        self.option(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get a `usize` option, falling back to `default` when absent or malformed
    pub fn option_usize(&self, key: &str, default: usize) -> usize {
        self.option(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Set an option in place
    pub fn add_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    /// Set an option and return the URL
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_option(key, value);
        self
    }

    /// Remove an option
    pub fn remove_option(&mut self, key: &str) -> Option<String> {
        self.options.remove(key)
    }

    /// Return a copy with a different path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Return a copy with a different port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Whether this URL describes a consumer
    pub fn is_consumer(&self) -> bool {
        self.protocol == CONSUMER_PROTOCOL || self.option(keys::TYPE) == Some(role::CONSUMER)
    }

    /// Whether this URL describes a provider
    pub fn is_provider(&self) -> bool {
        !self.is_consumer()
            && matches!(self.option(keys::TYPE), None | Some(role::PROVIDER))
    }

    /// Identity string: `protocol://host:port/form/path/version`
    pub fn identity(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}/{}",
            self.protocol,
            self.host,
            self.port,
            self.form().unwrap_or(""),
            self.path,
            self.version().unwrap_or("")
        )
    }

    /// Key a server uses to track the providers exported through it
    pub fn provider_key(&self) -> String {
        self.identity()
    }

    /// Whether this provider URL can serve the given consumer URL
    pub fn matches_consumer(&self, consumer: &Url) -> bool {
        if self.path != consumer.path {
            return false;
        }
        let form_ok = consumer.form().is_none_or(|f| self.form() == Some(f));
        let version_ok = consumer.version().is_none_or(|v| self.version() == Some(v));
        form_ok && version_ok
    }

    fn identity_parts(&self) -> (&str, &str, u16, &str, Option<&str>, Option<&str>) {
        (
            &self.protocol,
            &self.host,
            self.port,
            &self.path,
            self.form(),
            self.version(),
        )
    }
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.identity_parts() == other.identity_parts()
    }
}

impl Eq for Url {}

impl Hash for Url {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_parts().hash(state);
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)?;
        for (i, (key, value)) in self.options.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                sep,
                urlencoding::encode(key),
                urlencoding::encode(value)
            )?;
        }
        Ok(())
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
