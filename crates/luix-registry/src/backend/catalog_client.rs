//! Service catalog transport used by the polling backend
//!
//! Mirrors a Consul-style agent API: services are registered under a fixed
//! service name, carry the endpoint URL as metadata, and count as active only
//! while their TTL check keeps passing.

use crate::{error::Result, sync::lock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Service name under which providers are registered
pub const PROVIDER_SERVICE_NAME: &str = "luix-provider";

/// Service name under which consumers are registered
pub const CONSUMER_SERVICE_NAME: &str = "luix-consumer";

/// A catalog service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    /// Unique instance id
    pub id: String,
    /// Service name
    pub name: String,
    /// Instance host
    pub address: String,
    /// Instance port
    pub port: u16,
    /// Full endpoint URL text
    pub url: String,
}

/// Catalog transport
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Register or replace a service instance
    async fn register_service(&self, service: CatalogService) -> Result<()>;

    /// Remove a service instance
    async fn deregister_service(&self, id: &str) -> Result<()>;

    /// All instances of a service name
    async fn find(&self, name: &str) -> Result<Vec<CatalogService>>;

    /// Instances of a service name whose TTL check is passing
    async fn find_active(&self, name: &str) -> Result<Vec<CatalogService>>;

    /// Report a passing TTL check
    async fn check_pass(&self, id: &str) -> Result<()>;

    /// Report a failing TTL check
    async fn check_fail(&self, id: &str) -> Result<()>;
}

struct Instance {
    service: CatalogService,
    last_pass: Option<Instant>,
}

/// In-process catalog with TTL-based liveness
pub struct MemoryCatalog {
    instances: Mutex<HashMap<String, Instance>>,
    ttl: Duration,
}

impl MemoryCatalog {
    /// Create a catalog whose checks expire after `ttl` without a pass
    pub fn new(ttl: Duration) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn register_service(&self, service: CatalogService) -> Result<()> {
        lock(&self.instances).insert(
            service.id.clone(),
            Instance {
                service,
                last_pass: None,
            },
        );
        Ok(())
    }

    async fn deregister_service(&self, id: &str) -> Result<()> {
        lock(&self.instances).remove(id);
        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Vec<CatalogService>> {
        Ok(lock(&self.instances)
            .values()
            .filter(|i| i.service.name == name)
            .map(|i| i.service.clone())
            .collect())
    }

    async fn find_active(&self, name: &str) -> Result<Vec<CatalogService>> {
        let now = Instant::now();
        Ok(lock(&self.instances)
            .values()
            .filter(|i| i.service.name == name)
            .filter(|i| i.last_pass.is_some_and(|t| now.duration_since(t) <= self.ttl))
            .map(|i| i.service.clone())
            .collect())
    }

    async fn check_pass(&self, id: &str) -> Result<()> {
        if let Some(instance) = lock(&self.instances).get_mut(id) {
            instance.last_pass = Some(Instant::now());
        }
        Ok(())
    }

    async fn check_fail(&self, id: &str) -> Result<()> {
        if let Some(instance) = lock(&self.instances).get_mut(id) {
            instance.last_pass = None;
        }
        Ok(())
    }
}
