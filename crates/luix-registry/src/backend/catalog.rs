//! Poll-diff backend over a service catalog with TTL heartbeats
//!
//! Registration creates a catalog instance whose TTL check starts failing;
//! activation adds the instance to the heartbeat set so a background task
//! keeps its check passing. A second background task polls the active
//! provider set on a fixed interval, groups it by path and pushes every
//! changed (or vanished) subscribed path into the notification pipeline.
//! Both loops log and retry on failure and only stop on [`close`].
//!
//! [`close`]: RegistryBackend::close

use super::{
    RegistryBackend,
    catalog_client::{CONSUMER_SERVICE_NAME, CatalogClient, CatalogService, PROVIDER_SERVICE_NAME},
    parse_urls, same_providers,
};
use crate::{
    config::RegistryConfig,
    error::{Error, Result},
    notify::Notifier,
    spawn::{Spawner, sleep},
    sync::lock,
    url::Url,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Catalog instance id of a URL
pub fn service_id(url: &Url) -> Result<String> {
    Ok(format!("{}/{}/{}", service_name(url)?, url.path(), url.address()))
}

fn service_name(url: &Url) -> Result<&'static str> {
    if url.is_provider() {
        Ok(PROVIDER_SERVICE_NAME)
    } else if url.is_consumer() {
        Ok(CONSUMER_SERVICE_NAME)
    } else {
        Err(Error::configuration(format!(
            "URL is neither provider nor consumer: {}",
            url
        )))
    }
}

/// State shared with the poll and heartbeat loops
struct Shared {
    client: Arc<dyn CatalogClient>,
    notifier: Arc<Notifier>,
    heartbeat_ids: Mutex<HashSet<String>>,
    /// Subscriber count per path
    subscribed: Mutex<HashMap<String, usize>>,
    /// Last list pushed per path
    last: Mutex<HashMap<String, Vec<Url>>>,
    closed: AtomicBool,
}

impl Shared {
    async fn active_providers(&self) -> Result<Vec<Url>> {
        let services = self.client.find_active(PROVIDER_SERVICE_NAME).await?;
        Ok(parse_urls(services.iter().map(|s| s.url.as_str())))
    }

    /// One poll cycle: fetch, group by path, diff, notify
    async fn poll_once(&self) -> Result<()> {
        let mut grouped: HashMap<String, Vec<Url>> = HashMap::new();
        for url in self.active_providers().await? {
            grouped.entry(url.path().to_string()).or_default().push(url);
        }

        let paths: Vec<String> = lock(&self.subscribed).keys().cloned().collect();
        for path in paths {
            let current = grouped.remove(&path).unwrap_or_default();
            let changed = match lock(&self.last).get(&path) {
                Some(previous) => !same_providers(previous, &current),
                None => !current.is_empty(),
            };
            if !changed {
                continue;
            }

            debug!("Providers of {} changed: {} active", path, current.len());
            // The baseline only moves once the pipeline accepted the list, so
            // a rejected change is seen again on the next cycle
            match self.notifier.notify(&path, current.clone()) {
                Ok(()) => {
                    lock(&self.last).insert(path, current);
                }
                Err(e) => warn!("Dropped provider change for {}: {}", path, e),
            }
        }
        Ok(())
    }

    async fn heartbeat_once(&self) {
        let ids: Vec<String> = lock(&self.heartbeat_ids).iter().cloned().collect();
        for id in ids {
            if let Err(e) = self.client.check_pass(&id).await {
                warn!("Heartbeat for {} failed: {}", id, e);
            }
        }
    }
}

/// Catalog backend
pub struct CatalogBackend {
    shared: Arc<Shared>,
}

impl CatalogBackend {
    /// Create the backend and start its poll and heartbeat loops
    pub fn new(
        client: Arc<dyn CatalogClient>,
        notifier: Arc<Notifier>,
        config: &RegistryConfig,
        spawner: &dyn Spawner,
    ) -> Self {
        let shared = Arc::new(Shared {
            client,
            notifier,
            heartbeat_ids: Mutex::new(HashSet::new()),
            subscribed: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let poll_interval = config.discovery_interval();
        let retry_interval = config.retry_interval();
        let poller = shared.clone();
        spawner.spawn(Box::pin(async move {
            info!("Catalog poll loop started ({:?} interval)", poll_interval);
            while !poller.closed.load(Ordering::Acquire) {
                match poller.poll_once().await {
                    Ok(()) => sleep(poll_interval).await,
                    Err(e) => {
                        error!("Catalog poll failed, retrying in {:?}: {}", retry_interval, e);
                        sleep(retry_interval).await;
                    }
                }
            }
            info!("Catalog poll loop stopped");
        }));

        let heartbeat_interval = config.heartbeat_interval();
        let beater = shared.clone();
        spawner.spawn(Box::pin(async move {
            while !beater.closed.load(Ordering::Acquire) {
                beater.heartbeat_once().await;
                sleep(heartbeat_interval).await;
            }
        }));

        Self { shared }
    }

    /// Run a single poll cycle immediately
    pub async fn poll_now(&self) -> Result<()> {
        self.shared.poll_once().await
    }

    /// Default TTL for heartbeats sent every `heartbeat_interval`
    pub fn default_ttl(heartbeat_interval: Duration) -> Duration {
        heartbeat_interval * 3
    }
}

#[async_trait]
impl RegistryBackend for CatalogBackend {
    async fn do_register(&self, url: &Url) -> Result<()> {
        let service = CatalogService {
            id: service_id(url)?,
            name: service_name(url)?.to_string(),
            address: url.host().to_string(),
            port: url.port(),
            url: url.to_string(),
        };
        debug!("Registering catalog service {}", service.id);
        self.shared.client.register_service(service).await
    }

    async fn do_deregister(&self, url: &Url) -> Result<()> {
        let id = service_id(url)?;
        lock(&self.shared.heartbeat_ids).remove(&id);
        debug!("Deregistering catalog service {}", id);
        self.shared.client.deregister_service(&id).await
    }

    async fn do_activate(&self, url: &Url) -> Result<()> {
        let id = service_id(url)?;
        lock(&self.shared.heartbeat_ids).insert(id.clone());
        self.shared.client.check_pass(&id).await
    }

    async fn do_deactivate(&self, url: &Url) -> Result<()> {
        let id = service_id(url)?;
        lock(&self.shared.heartbeat_ids).remove(&id);
        self.shared.client.check_fail(&id).await
    }

    async fn discover_providers(&self, consumer_url: &Url) -> Result<Vec<Url>> {
        Ok(self
            .shared
            .active_providers()
            .await?
            .into_iter()
            .filter(|p| p.matches_consumer(consumer_url))
            .collect())
    }

    async fn subscribe_listener(&self, consumer_url: &Url) -> Result<()> {
        *lock(&self.shared.subscribed)
            .entry(consumer_url.path().to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn unsubscribe_listener(&self, consumer_url: &Url) -> Result<()> {
        let path = consumer_url.path();
        let mut subscribed = lock(&self.shared.subscribed);
        if let Some(count) = subscribed.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subscribed.remove(path);
                lock(&self.shared.last).remove(path);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl Drop for CatalogBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::catalog_client::MemoryCatalog;
    use crate::spawn::SmolSpawner;

    fn backend() -> (CatalogBackend, Arc<MemoryCatalog>) {
        let catalog = Arc::new(MemoryCatalog::new(Duration::from_secs(30)));
        let notifier = Arc::new(Notifier::new(
            Url::new("consul", "127.0.0.1", 8500, ""),
            2,
            16,
            &SmolSpawner,
        ));
        let config = RegistryConfig::new("consul", "127.0.0.1", 8500);
        (
            CatalogBackend::new(catalog.clone(), notifier, &config, &SmolSpawner),
            catalog,
        )
    }

    #[smol_potat::test]
    async fn test_activation_controls_liveness() {
        let (backend, catalog) = backend();
        let url = Url::parse("luix://10.0.0.1:8001/com.foo.Svc?version=1.0").unwrap();
        let consumer = Url::consumer("luix", "10.0.0.9", 0, "com.foo.Svc");

        backend.do_register(&url).await.unwrap();
        assert_eq!(catalog.find(PROVIDER_SERVICE_NAME).await.unwrap().len(), 1);
        assert!(backend.discover_providers(&consumer).await.unwrap().is_empty());

        backend.do_activate(&url).await.unwrap();
        assert_eq!(backend.discover_providers(&consumer).await.unwrap(), vec![url.clone()]);

        backend.do_deactivate(&url).await.unwrap();
        assert!(backend.discover_providers(&consumer).await.unwrap().is_empty());

        backend.do_deregister(&url).await.unwrap();
        assert!(catalog.find(PROVIDER_SERVICE_NAME).await.unwrap().is_empty());
        backend.close();
    }

    #[smol_potat::test]
    async fn test_rejected_change_is_redelivered_by_next_poll() {
        use crate::listener::ProviderListener;
        use crate::spawn::HeldSpawner;

        let catalog = Arc::new(MemoryCatalog::new(Duration::from_secs(30)));
        let workers = HeldSpawner::default();
        let notifier = Arc::new(Notifier::new(
            Url::new("consul", "127.0.0.1", 8500, ""),
            1,
            1,
            &workers,
        ));
        let config = RegistryConfig::new("consul", "127.0.0.1", 8500);
        let backend = CatalogBackend::new(catalog, notifier.clone(), &config, &SmolSpawner);

        let url = Url::parse("luix://10.0.0.1:8001/com.foo.Svc").unwrap();
        let consumer = Url::consumer("luix", "10.0.0.9", 0, "com.foo.Svc");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn ProviderListener> =
            Arc::new(move |_: &Url, _: &Url, providers: Vec<Url>| {
                sink.lock().unwrap().push(providers);
            });
        notifier.add_listener(&consumer, listener);
        backend.subscribe_listener(&consumer).await.unwrap();

        // Occupy the only queue slot while no worker runs
        notifier.notify("com.foo.Other", vec![url.clone()]).unwrap();
        backend.do_register(&url).await.unwrap();
        backend.do_activate(&url).await.unwrap();
        backend.poll_now().await.unwrap();
        assert!(notifier.cached("com.foo.Svc").is_none());

        workers.release();
        for _ in 0..200 {
            if notifier.cached("com.foo.Other").is_some() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        backend.poll_now().await.unwrap();
        for _ in 0..200 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(notifier.cached("com.foo.Svc"), Some(vec![url.clone()]));
        assert_eq!(seen.lock().unwrap().last(), Some(&vec![url]));
        backend.close();
    }

    #[test]
    fn test_service_ids_separate_roles() {
        let provider = Url::parse("luix://10.0.0.1:8001/Svc").unwrap();
        let consumer = Url::consumer("luix", "10.0.0.1", 8001, "Svc");
        assert_ne!(service_id(&provider).unwrap(), service_id(&consumer).unwrap());
        assert!(service_id(&Url::parse("luix://h:1/Svc?type=x").unwrap()).is_err());
    }

    #[test]
    fn test_default_ttl() {
        assert_eq!(
            CatalogBackend::default_ttl(Duration::from_secs(3)),
            Duration::from_secs(9)
        );
    }
}
