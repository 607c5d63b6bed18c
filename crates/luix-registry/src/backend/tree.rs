//! Watch-push backend over a hierarchical node store
//!
//! Layout: `/luix/{path}/{provider|consumer}/{active|inactive}/{host:port}`,
//! node data being the full URL text. Activation moves a node between the
//! `inactive` and `active` directories. Subscribed paths carry a child watch
//! on their active provider directory; each firing re-reads the directory and
//! pushes the list into the notification pipeline when it changed.

use super::{RegistryBackend, node_store::NodeStore, parse_urls, same_providers};
use crate::{
    error::{Error, Result},
    notify::Notifier,
    spawn::BoxTask,
    sync::lock,
    url::{Url, role},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Root node of every registered path
pub const ROOT: &str = "/luix";

/// Node status directories
const ACTIVE: &str = "active";
const INACTIVE: &str = "inactive";

fn role_of(url: &Url) -> Result<&'static str> {
    if url.is_provider() {
        Ok(role::PROVIDER)
    } else if url.is_consumer() {
        Ok(role::CONSUMER)
    } else {
        Err(Error::configuration(format!(
            "URL is neither provider nor consumer: {}",
            url
        )))
    }
}

/// Directory holding nodes of one role/status under a path
pub fn status_dir(path: &str, role: &str, status: &str) -> String {
    format!("{}/{}/{}/{}", ROOT, path, role, status)
}

fn node_path(url: &Url, role: &str, status: &str) -> String {
    format!("{}/{}", status_dir(url.path(), role, status), url.address())
}

/// Re-reads watched directories and feeds the pipeline
struct Refresher {
    store: Arc<dyn NodeStore>,
    notifier: Arc<Notifier>,
    /// Last list pushed per path; the async lock also serializes refreshes
    last: futures::lock::Mutex<HashMap<String, Vec<Url>>>,
}

impl Refresher {
    async fn read_active(store: &dyn NodeStore, path: &str) -> Result<Vec<Url>> {
        let dir = status_dir(path, role::PROVIDER, ACTIVE);
        let mut texts = Vec::new();
        for child in store.children(&dir).await? {
            if let Some(data) = store.get_data(&format!("{}/{}", dir, child)).await? {
                texts.push(data);
            }
        }
        Ok(parse_urls(texts.iter().map(|s| s.as_str())))
    }

    async fn refresh(&self, path: &str) {
        let mut last = self.last.lock().await;
        if !last.contains_key(path) && self.notifier.listener_count(path) == 0 {
            return;
        }

        let providers = match Self::read_active(self.store.as_ref(), path).await {
            Ok(providers) => providers,
            Err(e) => {
                error!("Failed to re-read providers of {}: {}", path, e);
                return;
            }
        };

        let changed = match last.get(path) {
            Some(previous) => !same_providers(previous, &providers),
            None => true,
        };
        if !changed {
            return;
        }

        debug!("Providers of {} changed: {} active", path, providers.len());
        match self.notifier.notify(path, providers.clone()) {
            Ok(()) => {
                last.insert(path.to_string(), providers);
            }
            Err(e) => error!("Dropped provider change for {}: {}", path, e),
        }
    }
}

/// Tree backend
pub struct TreeBackend {
    store: Arc<dyn NodeStore>,
    refresher: Arc<Refresher>,
    /// Subscribed consumer identities per path
    watched: Mutex<HashMap<String, HashSet<String>>>,
}

impl TreeBackend {
    /// Create a backend over `store`, reporting changes to `notifier`
    pub fn new(store: Arc<dyn NodeStore>, notifier: Arc<Notifier>) -> Self {
        Self {
            refresher: Arc::new(Refresher {
                store: store.clone(),
                notifier,
                last: futures::lock::Mutex::new(HashMap::new()),
            }),
            store,
            watched: Mutex::new(HashMap::new()),
        }
    }

    async fn move_node(&self, url: &Url, to: &str) -> Result<()> {
        let role = role_of(url)?;
        self.store.delete(&node_path(url, role, ACTIVE)).await?;
        self.store.delete(&node_path(url, role, INACTIVE)).await?;
        self.store
            .create(&node_path(url, role, to), &url.to_string())
            .await
    }
}

#[async_trait]
impl RegistryBackend for TreeBackend {
    async fn do_register(&self, url: &Url) -> Result<()> {
        debug!("Creating inactive node for {}", url);
        self.move_node(url, INACTIVE).await
    }

    async fn do_deregister(&self, url: &Url) -> Result<()> {
        let role = role_of(url)?;
        debug!("Removing nodes for {}", url);
        self.store.delete(&node_path(url, role, ACTIVE)).await?;
        self.store.delete(&node_path(url, role, INACTIVE)).await
    }

    async fn do_activate(&self, url: &Url) -> Result<()> {
        debug!("Moving {} to active", url);
        self.move_node(url, ACTIVE).await
    }

    async fn do_deactivate(&self, url: &Url) -> Result<()> {
        debug!("Moving {} to inactive", url);
        self.move_node(url, INACTIVE).await
    }

    async fn discover_providers(&self, consumer_url: &Url) -> Result<Vec<Url>> {
        let providers = Refresher::read_active(self.store.as_ref(), consumer_url.path()).await?;
        Ok(providers
            .into_iter()
            .filter(|p| p.matches_consumer(consumer_url))
            .collect())
    }

    async fn subscribe_listener(&self, consumer_url: &Url) -> Result<()> {
        let path = consumer_url.path().to_string();
        let first = {
            let mut watched = lock(&self.watched);
            let consumers = watched.entry(path.clone()).or_default();
            let first = consumers.is_empty();
            consumers.insert(consumer_url.identity());
            first
        };

        if first {
            info!("Watching providers of {}", path);
            let refresher = self.refresher.clone();
            let watched_path = path.clone();
            self.store.watch_children(
                &status_dir(&path, role::PROVIDER, ACTIVE),
                Arc::new(move |_dir: String| -> BoxTask {
                    let refresher = refresher.clone();
                    let path = watched_path.clone();
                    Box::pin(async move { refresher.refresh(&path).await })
                }),
            );
        }
        Ok(())
    }

    async fn unsubscribe_listener(&self, consumer_url: &Url) -> Result<()> {
        let path = consumer_url.path();
        let last_one = {
            let mut watched = lock(&self.watched);
            match watched.get_mut(path) {
                Some(consumers) => {
                    consumers.remove(&consumer_url.identity());
                    if consumers.is_empty() {
                        watched.remove(path);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last_one {
            info!("Stopped watching providers of {}", path);
            self.store
                .unwatch_children(&status_dir(path, role::PROVIDER, ACTIVE));
            self.refresher.last.lock().await.remove(path);
        }
        Ok(())
    }

    fn close(&self) {
        let paths: Vec<String> = lock(&self.watched).drain().map(|(path, _)| path).collect();
        for path in paths {
            self.store
                .unwatch_children(&status_dir(&path, role::PROVIDER, ACTIVE));
        }
    }
}
