//! Registry template over a pluggable backend
//!
//! [`Registry`] owns everything that is common to all backends: copying and
//! stripping URLs before they reach the backend, the registered provider and
//! consumer sets, listener bookkeeping, and cache-first discovery. Backends
//! only implement [`RegistryBackend`].

use crate::{
    backend::RegistryBackend,
    error::{Error, Result},
    listener::{GlobalProviderListener, ProviderListener},
    notify::Notifier,
    sync::{read, write},
    url::{Url, keys},
};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Options that must never be persisted in a registry
const UNSAFE_OPTIONS: &[&str] = &[keys::CODEC];

/// Registry client for one backend instance
pub struct Registry {
    url: Url,
    backend: Arc<dyn RegistryBackend>,
    notifier: Arc<Notifier>,
    registered_providers: RwLock<HashSet<Url>>,
    registered_consumers: RwLock<HashSet<Url>>,
}

impl Registry {
    /// Create a registry over a backend that reports changes to `notifier`
    pub fn with_backend(
        url: Url,
        backend: Arc<dyn RegistryBackend>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            url,
            backend,
            notifier,
            registered_providers: RwLock::new(HashSet::new()),
            registered_consumers: RwLock::new(HashSet::new()),
        }
    }

    /// URL of this registry
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Copy a URL and drop options the backend must not see
    fn strip(url: &Url) -> Url {
        let mut copy = url.clone();
        for key in UNSAFE_OPTIONS {
            copy.remove_option(key);
        }
        copy
    }

    fn registered_set(&self, url: &Url) -> Result<&RwLock<HashSet<Url>>> {
        if url.is_provider() {
            Ok(&self.registered_providers)
        } else if url.is_consumer() {
            Ok(&self.registered_consumers)
        } else {
            Err(Error::configuration(format!(
                "URL is neither provider nor consumer: {}",
                url
            )))
        }
    }

    /// Register a provider or consumer URL (inactive until activated)
    pub async fn register(&self, url: &Url) -> Result<()> {
        let url = Self::strip(url);
        let set = self.registered_set(&url)?;

        info!("Registering {} on {}", url, self.url);
        self.backend.do_register(&url).await?;
        write(set).replace(url);
        Ok(())
    }

    /// Remove a registered URL
    pub async fn deregister(&self, url: &Url) -> Result<()> {
        let url = Self::strip(url);
        let set = self.registered_set(&url)?;

        info!("Deregistering {} from {}", url, self.url);
        self.backend.do_deregister(&url).await?;
        write(set).remove(&url);
        Ok(())
    }

    /// Mark a URL live, or every URL registered by this registry when `None`
    pub async fn activate(&self, url: Option<&Url>) -> Result<()> {
        match url {
            Some(url) => {
                let url = Self::strip(url);
                info!("Activating {} on {}", url, self.url);
                self.backend.do_activate(&url).await
            }
            None => {
                for url in self.registered_urls() {
                    info!("Activating {} on {}", url, self.url);
                    self.backend.do_activate(&url).await?;
                }
                Ok(())
            }
        }
    }

    /// Mark a URL not live, or every URL registered by this registry when `None`
    pub async fn deactivate(&self, url: Option<&Url>) -> Result<()> {
        match url {
            Some(url) => {
                let url = Self::strip(url);
                info!("Deactivating {} on {}", url, self.url);
                self.backend.do_deactivate(&url).await
            }
            None => {
                for url in self.registered_urls() {
                    info!("Deactivating {} on {}", url, self.url);
                    self.backend.do_deactivate(&url).await?;
                }
                Ok(())
            }
        }
    }

    /// Subscribe a listener to the providers of a consumer URL
    ///
    /// The listener is notified right away when providers are already known,
    /// so it does not stay stale until the next external change.
    pub async fn subscribe(
        &self,
        consumer_url: &Url,
        listener: Arc<dyn ProviderListener>,
    ) -> Result<()> {
        let consumer_url = Self::strip(consumer_url);
        let path = consumer_url.path().to_string();

        self.notifier.add_listener(&consumer_url, listener);
        self.backend.subscribe_listener(&consumer_url).await?;
        info!("Subscribed to providers of {} on {}", path, self.url);

        let providers = match self.notifier.cached(&path) {
            Some(cached) => cached,
            None => {
                let all_on_path = Url::consumer(
                    consumer_url.protocol(),
                    consumer_url.host(),
                    consumer_url.port(),
                    path.clone(),
                );
                self.backend.discover_providers(&all_on_path).await?
            }
        };

        if !providers.is_empty() {
            self.notifier.notify_now(&path, providers);
        }
        Ok(())
    }

    /// Remove a listener previously passed to [`subscribe`](Self::subscribe)
    pub async fn unsubscribe(
        &self,
        consumer_url: &Url,
        listener: &Arc<dyn ProviderListener>,
    ) -> Result<()> {
        let consumer_url = Self::strip(consumer_url);
        if self.notifier.remove_listener(&consumer_url, listener) {
            debug!("No listeners left for {}", consumer_url.path());
        }
        self.backend.unsubscribe_listener(&consumer_url).await?;
        info!("Unsubscribed from providers of {} on {}", consumer_url.path(), self.url);
        Ok(())
    }

    /// Install the cluster-wide listener, replacing any previous one
    pub fn subscribe_global(&self, listener: Arc<dyn GlobalProviderListener>) {
        self.notifier.set_global_listener(Some(listener));
    }

    /// Remove the cluster-wide listener
    pub fn unsubscribe_global(&self) {
        self.notifier.set_global_listener(None);
    }

    /// Active providers for a consumer URL
    ///
    /// Served from the cache when the path was discovered before. Otherwise
    /// returns an empty list when `only_from_cache` is set, or asks the
    /// backend. The returned URLs are copies the caller may freely mutate.
    pub async fn discover_active(&self, consumer_url: &Url, only_from_cache: bool) -> Result<Vec<Url>> {
        if let Some(cached) = self.notifier.cached(consumer_url.path()) {
            return Ok(cached
                .into_iter()
                .filter(|p| p.matches_consumer(consumer_url))
                .collect());
        }
        if only_from_cache {
            return Ok(Vec::new());
        }
        self.backend.discover_providers(consumer_url).await
    }

    /// Provider URLs registered through this registry
    pub fn registered_providers(&self) -> Vec<Url> {
        read(&self.registered_providers).iter().cloned().collect()
    }

    /// Consumer URLs registered through this registry
    pub fn registered_consumers(&self) -> Vec<Url> {
        read(&self.registered_consumers).iter().cloned().collect()
    }

    fn registered_urls(&self) -> Vec<Url> {
        let mut urls = self.registered_providers();
        urls.extend(self.registered_consumers());
        urls
    }

    /// Notification pipeline of this registry
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Stop backend drivers
    pub fn close(&self) {
        info!("Closing registry {}", self.url);
        self.backend.close();
    }
}
