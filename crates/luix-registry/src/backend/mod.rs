//! Registry backend implementations

pub mod catalog;
pub mod catalog_client;
pub mod node_store;
pub mod tree;

use crate::{error::Result, url::Url};
use async_trait::async_trait;

/// Backend contract driven by [`Registry`](crate::Registry)
///
/// URLs handed to the backend are already copied and stripped of options
/// that must not be persisted. All calls may block on backend I/O.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Persist a provider or consumer URL as inactive
    async fn do_register(&self, url: &Url) -> Result<()>;

    /// Remove a previously registered URL
    async fn do_deregister(&self, url: &Url) -> Result<()>;

    /// Mark a URL live
    async fn do_activate(&self, url: &Url) -> Result<()>;

    /// Mark a URL not live
    async fn do_deactivate(&self, url: &Url) -> Result<()>;

    /// Fetch the active providers matching a consumer URL
    async fn discover_providers(&self, consumer_url: &Url) -> Result<Vec<Url>>;

    /// Start tracking changes for a consumer's path
    async fn subscribe_listener(&self, consumer_url: &Url) -> Result<()>;

    /// Stop tracking changes for a consumer's path
    async fn unsubscribe_listener(&self, consumer_url: &Url) -> Result<()>;

    /// Stop background drivers
    fn close(&self) {}
}

/// Parse URL texts read from a backend, skipping malformed entries
pub(crate) fn parse_urls<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<Url> {
    texts
        .into_iter()
        .filter_map(|text| match Url::parse(text) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("Skipping malformed URL from backend: {}", e);
                None
            }
        })
        .collect()
}

/// Order-insensitive comparison of two provider lists by their full text
pub(crate) fn same_providers(a: &[Url], b: &[Url]) -> bool {
    let mut a: Vec<String> = a.iter().map(|u| u.to_string()).collect();
    let mut b: Vec<String> = b.iter().map(|u| u.to_string()).collect();
    a.sort();
    b.sort();
    a == b
}
