//! Process-level object owning every table shared between exporters and stubs
//!
//! Registries, shared servers and the named strategy tables hang off one
//! explicitly constructed [`LuixRuntime`], so tests can build as many
//! isolated runtimes as they need.

use crate::cluster::{
    balance::{LoadBalancer, load_balancers},
    tolerance::{FaultTolerance, fault_tolerances},
};
use crate::endpoint::{EndpointFactory, endpoint_factories};
use crate::error::Result;
use crate::server::{
    health::{HealthChecker, health_checkers},
    router::ProviderRouter,
    shared::{ServerFactory, SharedServers},
};
use luix_registry::{RegistryFactory, Spawner, Strategies};
use std::sync::Arc;

/// Shared state of one RPC process
pub struct LuixRuntime {
    spawner: Arc<dyn Spawner>,
    registries: RegistryFactory,
    shared_servers: Arc<SharedServers>,
    router: Arc<ProviderRouter>,
    endpoint_factories: Strategies<Arc<dyn EndpointFactory>>,
    load_balancers: Strategies<Arc<dyn LoadBalancer>>,
    fault_tolerances: Strategies<Arc<dyn FaultTolerance>>,
    health_checkers: Strategies<Arc<dyn HealthChecker>>,
}

impl LuixRuntime {
    /// Runtime with the built-in registry backends and strategies
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        let registries = RegistryFactory::new(spawner.clone());
        Self::with_registries(spawner, registries)
    }

    /// Runtime over a custom registry factory
    pub fn with_registries(spawner: Arc<dyn Spawner>, registries: RegistryFactory) -> Self {
        Self {
            endpoint_factories: endpoint_factories(spawner.clone()),
            spawner,
            registries,
            shared_servers: Arc::new(SharedServers::new()),
            router: Arc::new(ProviderRouter::new()),
            load_balancers: load_balancers(),
            fault_tolerances: fault_tolerances(),
            health_checkers: health_checkers(),
        }
    }

    /// Executor for background tasks
    pub fn spawner(&self) -> &Arc<dyn Spawner> {
        &self.spawner
    }

    /// Registry factory
    pub fn registries(&self) -> &RegistryFactory {
        &self.registries
    }

    /// Shared server table
    pub fn shared_servers(&self) -> &Arc<SharedServers> {
        &self.shared_servers
    }

    /// Router behind every server of this runtime
    ///
    /// A shared server keeps the handler it was created with, so all
    /// exporters of one runtime route through this single table.
    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Endpoint factory for a protocol
    pub fn endpoint_factory(&self, protocol: &str) -> Result<Arc<dyn EndpointFactory>> {
        Ok(self.endpoint_factories.create(protocol)?)
    }

    /// Load balancer by name
    pub fn load_balancer(&self, name: &str) -> Result<Arc<dyn LoadBalancer>> {
        Ok(self.load_balancers.create(name)?)
    }

    /// Fault tolerance strategy by name
    pub fn fault_tolerance(&self, name: &str) -> Result<Arc<dyn FaultTolerance>> {
        Ok(self.fault_tolerances.create(name)?)
    }

    /// Server factory for a protocol, recording into this runtime's shared servers
    pub fn server_factory(&self, protocol: &str) -> Result<ServerFactory> {
        Ok(ServerFactory::new(
            self.endpoint_factory(protocol)?,
            self.health_checkers.clone(),
            self.shared_servers.clone(),
        ))
    }

    /// Add or replace an endpoint factory
    pub fn register_endpoint_factory(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Arc<dyn EndpointFactory> + Send + Sync + 'static,
    ) {
        self.endpoint_factories.register(name, constructor);
    }

    /// Add or replace a load balancer
    pub fn register_load_balancer(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Arc<dyn LoadBalancer> + Send + Sync + 'static,
    ) {
        self.load_balancers.register(name, constructor);
    }

    /// Add or replace a health checker
    pub fn register_health_checker(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Arc<dyn HealthChecker> + Send + Sync + 'static,
    ) {
        self.health_checkers.register(name, constructor);
    }
}
