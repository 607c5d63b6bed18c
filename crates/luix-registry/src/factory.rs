//! Registry factory
//!
//! Maps backend names to builders and caches one [`Registry`] per registry
//! URL, so every component asking for the same registry shares its caches
//! and listeners.

use crate::{
    backend::{
        RegistryBackend,
        catalog::CatalogBackend,
        catalog_client::{CatalogClient, MemoryCatalog},
        node_store::{MemoryNodeStore, NodeStore},
        tree::TreeBackend,
    },
    config::RegistryConfig,
    error::{Error, Result},
    notify::Notifier,
    registry::Registry,
    spawn::Spawner,
    sync::lock,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Name of the tree (watch-push) backend
pub const ZOOKEEPER: &str = "zookeeper";

/// Name of the catalog (poll-diff) backend
pub const CONSUL: &str = "consul";

/// Everything a backend builder receives
pub struct BackendContext<'a> {
    /// Registry configuration
    pub config: &'a RegistryConfig,
    /// Notification pipeline of the registry being built
    pub notifier: Arc<Notifier>,
    /// Executor for background loops
    pub spawner: &'a dyn Spawner,
}

/// Constructs a backend for a registry configuration
pub type BackendBuilder =
    Arc<dyn Fn(BackendContext<'_>) -> Result<Arc<dyn RegistryBackend>> + Send + Sync>;

/// Creates and caches registries by URL
pub struct RegistryFactory {
    builders: HashMap<String, BackendBuilder>,
    spawner: Arc<dyn Spawner>,
    registries: Mutex<HashMap<String, Arc<Registry>>>,
}

impl RegistryFactory {
    /// Factory with the built-in backends over in-process transports
    ///
    /// Registries created by the same factory share one node store and one
    /// catalog, so providers and consumers in one process see each other.
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new(spawner.clone()));
        let mut factory = Self::empty(spawner);

        factory.register_backend(ZOOKEEPER, move |ctx: BackendContext<'_>| {
            Ok(Arc::new(TreeBackend::new(store.clone(), ctx.notifier)) as Arc<dyn RegistryBackend>)
        });

        let catalog: Arc<Mutex<Option<Arc<dyn CatalogClient>>>> = Arc::new(Mutex::new(None));
        factory.register_backend(CONSUL, move |ctx: BackendContext<'_>| {
            let client = lock(&catalog)
                .get_or_insert_with(|| {
                    Arc::new(MemoryCatalog::new(CatalogBackend::default_ttl(
                        ctx.config.heartbeat_interval(),
                    ))) as Arc<dyn CatalogClient>
                })
                .clone();
            Ok(Arc::new(CatalogBackend::new(client, ctx.notifier, ctx.config, ctx.spawner))
                as Arc<dyn RegistryBackend>)
        });

        factory
    }

    /// Factory without any backend
    pub fn empty(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            builders: HashMap::new(),
            spawner,
            registries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend builder under a name, replacing any previous one
    pub fn register_backend(
        &mut self,
        name: impl Into<String>,
        builder: impl Fn(BackendContext<'_>) -> Result<Arc<dyn RegistryBackend>> + Send + Sync + 'static,
    ) {
        self.builders.insert(name.into(), Arc::new(builder));
    }

    /// Registered backend names
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get or create the registry for a configuration
    pub fn get_registry(&self, config: &RegistryConfig) -> Result<Arc<Registry>> {
        config.validate()?;
        let url = config.to_url();
        let key = url.identity();

        let mut registries = lock(&self.registries);
        if let Some(registry) = registries.get(&key) {
            return Ok(registry.clone());
        }

        let builder = self.builders.get(&config.name).ok_or_else(|| {
            Error::Configuration(format!("Unknown registry strategy: '{}'", config.name))
        })?;

        let notifier = Arc::new(Notifier::new(
            url.clone(),
            config.notification_workers,
            config.notification_queue_size,
            self.spawner.as_ref(),
        ));
        let backend = builder(BackendContext {
            config,
            notifier: notifier.clone(),
            spawner: self.spawner.as_ref(),
        })?;

        info!("Created {} registry at {}", config.name, url.address());
        let registry = Arc::new(Registry::with_backend(url, backend, notifier));
        registries.insert(key, registry.clone());
        Ok(registry)
    }

    /// All registries created so far
    pub fn registries(&self) -> Vec<Arc<Registry>> {
        lock(&self.registries).values().cloned().collect()
    }

    /// Close and forget every registry
    pub fn close_all(&self) {
        for (_, registry) in lock(&self.registries).drain() {
            registry.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::SmolSpawner;

    #[test]
    fn test_registry_is_cached_per_url() {
        let factory = RegistryFactory::new(Arc::new(SmolSpawner));
        let config = RegistryConfig::new(ZOOKEEPER, "127.0.0.1", 2181);

        let a = factory.get_registry(&config).unwrap();
        let b = factory.get_registry(&config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = factory
            .get_registry(&RegistryConfig::new(ZOOKEEPER, "127.0.0.1", 2182))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(factory.registries().len(), 2);
    }

    #[test]
    fn test_unknown_backend() {
        let factory = RegistryFactory::new(Arc::new(SmolSpawner));
        let config = RegistryConfig::new("etcd", "127.0.0.1", 2379);
        assert!(matches!(
            factory.get_registry(&config),
            Err(Error::Configuration(_))
        ));
        assert_eq!(factory.backend_names(), vec![CONSUL.to_string(), ZOOKEEPER.to_string()]);
    }
}
