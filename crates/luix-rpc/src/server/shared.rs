//! Shared-channel server factory
//!
//! Providers exported on the same address share one physical server when
//! their URLs allow it. The shared server is created with an empty path and
//! routes every request by interface name, and it stays open until the last
//! provider relying on it is destroyed.
//!
//! Bookkeeping lives in an explicit [`SharedServers`] object, so independent
//! runtimes (and tests) never see each other's servers.

use super::{MessageHandler, Server, health::HealthChecker};
use crate::config::{
    DEFAULT_CODEC, DEFAULT_HEALTH_CHECKER, DEFAULT_MAX_CONTENT_LENGTH,
    DEFAULT_MAX_SERVER_CONNECTIONS, DEFAULT_MAX_THREADS, DEFAULT_SERIALIZER,
    DEFAULT_WORK_QUEUE_SIZE,
};
use crate::endpoint::EndpointFactory;
use crate::error::{Error, Result};
use luix_registry::{Strategies, Url, sync::lock, url::keys};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Options that must agree for two providers to share a server, each with
/// the value an absent option stands for
fn compatibility_options() -> [(&'static str, String); 7] {
    [
        (keys::CODEC, DEFAULT_CODEC.to_string()),
        (keys::SERIALIZER, DEFAULT_SERIALIZER.to_string()),
        (keys::MAX_PAYLOAD, DEFAULT_MAX_CONTENT_LENGTH.to_string()),
        (
            keys::MAX_SERVER_CONNECTIONS,
            DEFAULT_MAX_SERVER_CONNECTIONS.to_string(),
        ),
        (keys::MAX_THREADS, DEFAULT_MAX_THREADS.to_string()),
        (keys::WORK_QUEUE_SIZE, DEFAULT_WORK_QUEUE_SIZE.to_string()),
        (keys::HEALTH_CHECKER, DEFAULT_HEALTH_CHECKER.to_string()),
    ]
}

#[derive(Default)]
struct SharedState {
    /// Bind address -> server
    servers: HashMap<String, Arc<dyn Server>>,
    /// Bind address -> provider keys relying on the server there
    provider_keys: HashMap<String, HashSet<String>>,
}

/// Process-wide table of shared servers
#[derive(Default)]
pub struct SharedServers {
    state: Mutex<SharedState>,
}

impl SharedServers {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live shared servers
    pub fn server_count(&self) -> usize {
        lock(&self.state).servers.len()
    }

    /// Shared server bound to an address
    pub fn server(&self, address: &str) -> Option<Arc<dyn Server>> {
        lock(&self.state).servers.get(address).cloned()
    }

    /// Provider keys relying on the server at an address, sorted
    pub fn provider_keys(&self, address: &str) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.state)
            .provider_keys
            .get(address)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn check_compatible(existing: &Url, requested: &Url) -> Result<()> {
    if existing.protocol() != requested.protocol() {
        return Err(Error::configuration(format!(
            "Cannot share {}: protocol '{}' differs from '{}'",
            requested.address(),
            requested.protocol(),
            existing.protocol()
        )));
    }
    for (key, default) in compatibility_options() {
        let have = existing.option_or(key, &default);
        let want = requested.option_or(key, &default);
        if have != want {
            return Err(Error::configuration(format!(
                "Cannot share {} for {}: {} is '{}' but the shared server uses '{}'",
                requested.address(),
                requested.path(),
                key,
                want,
                have
            )));
        }
    }
    Ok(())
}

fn is_shared(url: &Url) -> bool {
    url.option_bool(keys::SHARED_CHANNEL, true)
}

/// Creates servers, sharing them per address when allowed
pub struct ServerFactory {
    endpoint: Arc<dyn EndpointFactory>,
    health_checkers: Strategies<Arc<dyn HealthChecker>>,
    shared: Arc<SharedServers>,
}

impl ServerFactory {
    /// Factory building servers through `endpoint`
    pub fn new(
        endpoint: Arc<dyn EndpointFactory>,
        health_checkers: Strategies<Arc<dyn HealthChecker>>,
        shared: Arc<SharedServers>,
    ) -> Self {
        Self {
            endpoint,
            health_checkers,
            shared,
        }
    }

    /// Shared server table this factory records into
    pub fn shared(&self) -> &Arc<SharedServers> {
        &self.shared
    }

    /// Get a server for a provider URL
    ///
    /// When an existing shared server is reused, `handler` is not installed;
    /// the shared server keeps routing with the handler it was created with,
    /// which must therefore route by interface name.
    pub fn create_server(
        &self,
        url: &Url,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn Server>> {
        let checker_name = url.option_or(keys::HEALTH_CHECKER, DEFAULT_HEALTH_CHECKER);
        let handler = self.health_checkers.create(&checker_name)?.decorate(handler);

        let mut state = lock(&self.shared.state);
        if !is_shared(url) {
            debug!("Creating exclusive server for {}", url);
            return self.endpoint.create_server(url, handler);
        }

        let address = url.address();
        if let Some(server) = state.servers.get(&address).cloned() {
            check_compatible(server.url(), url)?;
            state
                .provider_keys
                .entry(address.clone())
                .or_default()
                .insert(url.provider_key());
            info!("Sharing server at {} with {}", address, url.path());
            return Ok(server);
        }

        let server = self
            .endpoint
            .create_server(&url.clone().with_path(""), handler)?;
        state.servers.insert(address.clone(), server.clone());
        state
            .provider_keys
            .entry(address.clone())
            .or_default()
            .insert(url.provider_key());
        info!("Created shared server at {} for {}", address, url.path());
        Ok(server)
    }

    /// Release a provider's server; returns whether the server was closed
    ///
    /// Exclusive servers close right away. Shared servers close only once no
    /// provider key remains on their address.
    pub fn destroy_server(&self, url: &Url, server: &Arc<dyn Server>) -> bool {
        let mut state = lock(&self.shared.state);
        if !is_shared(url) {
            server.close();
            return true;
        }

        let address = url.address();
        let remaining = match state.provider_keys.get_mut(&address) {
            Some(provider_keys) => {
                provider_keys.remove(&url.provider_key());
                provider_keys.len()
            }
            None => {
                warn!("No shared server recorded at {}", address);
                return false;
            }
        };
        if remaining > 0 {
            debug!(
                "Shared server at {} still serves {} providers",
                address, remaining
            );
            return false;
        }

        state.provider_keys.remove(&address);
        if let Some(server) = state.servers.remove(&address) {
            server.close();
        }
        info!("Closed shared server at {}", address);
        true
    }
}
