//! Listener traits for provider-set changes

use crate::url::Url;

/// Receives the current provider list for one subscribed consumer
pub trait ProviderListener: Send + Sync {
    /// Called with the providers of `consumer_url` as known by `registry_url`
    fn on_notify(&self, registry_url: &Url, consumer_url: &Url, providers: Vec<Url>);
}

/// Receives every provider-set change seen by a registry
pub trait GlobalProviderListener: Send + Sync {
    /// Called with the full provider list of `path`
    fn on_notify(&self, registry_url: &Url, path: &str, providers: Vec<Url>);
}

impl<F> ProviderListener for F
where
    F: Fn(&Url, &Url, Vec<Url>) + Send + Sync,
{
    fn on_notify(&self, registry_url: &Url, consumer_url: &Url, providers: Vec<Url>) {
        self(registry_url, consumer_url, providers)
    }
}

impl<F> GlobalProviderListener for F
where
    F: Fn(&Url, &str, Vec<Url>) + Send + Sync,
{
    fn on_notify(&self, registry_url: &Url, path: &str, providers: Vec<Url>) {
        self(registry_url, path, providers)
    }
}
