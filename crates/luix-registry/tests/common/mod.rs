//! Common test utilities for registry integration tests

#![allow(dead_code)]

use luix_registry::{ProviderListener, Url, spawn::sleep};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for waiting on asynchronous notifications
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener that records every provider list it receives
pub struct RecordingListener {
    seen: Mutex<Vec<Vec<Url>>>,
}

impl RecordingListener {
    /// Create a listener and its trait-object handle
    pub fn new() -> (Arc<Self>, Arc<dyn ProviderListener>) {
        let recorder = Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        });
        let handle: Arc<dyn ProviderListener> = recorder.clone();
        (recorder, handle)
    }

    /// All lists received so far
    pub fn seen(&self) -> Vec<Vec<Url>> {
        self.seen.lock().unwrap().clone()
    }

    /// Most recent list, if any
    pub fn latest(&self) -> Option<Vec<Url>> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl ProviderListener for RecordingListener {
    fn on_notify(&self, _registry_url: &Url, _consumer_url: &Url, providers: Vec<Url>) {
        self.seen.lock().unwrap().push(providers);
    }
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] elapses
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = std::time::Instant::now() + TEST_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Provider URL used across tests
pub fn svc_provider(host: &str, port: u16) -> Url {
    Url::parse(&format!(
        "luix://{}:{}/com.foo.Svc?form=f1&version=1.0&codec=luix",
        host, port
    ))
    .unwrap()
}

/// Consumer URL matching [`svc_provider`]
pub fn svc_consumer() -> Url {
    Url::consumer("luix", "10.0.0.9", 0, "com.foo.Svc")
        .with_option("form", "f1")
        .with_option("version", "1.0")
}
