//! Change-notification pipeline
//!
//! Backends detect provider-set changes on watch callbacks or poll loops and
//! hand the new list to [`Notifier::notify`]. Delivery to listeners happens on
//! a bounded pool of worker tasks:
//!
//! - each path owns a FIFO of pending snapshots, drained by at most one
//!   worker at a time, so listeners of a path see snapshots in submission
//!   order and never concurrently;
//! - the worker queue is bounded and full queues reject new work instead of
//!   growing, relying on the next poll/watch cycle to re-deliver state;
//! - the provider cache is only written here: an empty list evicts the path,
//!   a non-empty list replaces it.

use crate::{
    error::{Error, Result},
    listener::{GlobalProviderListener, ProviderListener},
    spawn::Spawner,
    sync::{lock, read, write},
    url::Url,
};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

/// Default number of notification workers
pub const DEFAULT_WORKERS: usize = 8;

/// Default bound of the notification queue
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// A listener registered for one consumer URL
#[derive(Clone)]
struct Subscription {
    consumer_url: Url,
    listener: Arc<dyn ProviderListener>,
}

/// Pending snapshots of one path
#[derive(Default)]
struct PathQueue {
    pending: VecDeque<Vec<Url>>,
    draining: bool,
}

struct NotifierState {
    registry_url: Url,
    provider_cache: RwLock<HashMap<String, Vec<Url>>>,
    listeners: RwLock<HashMap<String, Vec<Subscription>>>,
    global_listener: RwLock<Option<Arc<dyn GlobalProviderListener>>>,
    paths: Mutex<HashMap<String, PathQueue>>,
    queue_size: usize,
}

/// Notification pipeline owned by one registry instance
pub struct Notifier {
    state: Arc<NotifierState>,
    sender: async_channel::Sender<String>,
}

impl Notifier {
    /// Create a pipeline and start `workers` delivery tasks on `spawner`
    pub fn new(
        registry_url: Url,
        workers: usize,
        queue_size: usize,
        spawner: &dyn Spawner,
    ) -> Self {
        let queue_size = queue_size.max(1);
        let (sender, receiver) = async_channel::bounded::<String>(queue_size);
        let state = Arc::new(NotifierState {
            registry_url,
            provider_cache: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            global_listener: RwLock::new(None),
            paths: Mutex::new(HashMap::new()),
            queue_size,
        });

        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let state = state.clone();
            spawner.spawn(Box::pin(async move {
                while let Ok(path) = receiver.recv().await {
                    state.drain(&path);
                }
            }));
        }

        Self { state, sender }
    }

    /// URL of the owning registry
    pub fn registry_url(&self) -> &Url {
        &self.state.registry_url
    }

    /// Queue a provider list for delivery on a worker
    ///
    /// Fails with [`Error::NotificationRejected`] when the worker queue or
    /// the path backlog is full; the snapshot is dropped in that case.
    pub fn notify(&self, path: &str, providers: Vec<Url>) -> Result<()> {
        let schedule = {
            let mut paths = lock(&self.state.paths);
            let queue = paths.entry(path.to_string()).or_default();
            if queue.pending.len() >= self.state.queue_size {
                warn!("Notification backlog full for path {}, dropping snapshot", path);
                return Err(Error::NotificationRejected(path.to_string()));
            }
            queue.pending.push_back(providers);
            if queue.draining {
                false
            } else {
                queue.draining = true;
                true
            }
        };

        if schedule {
            if let Err(e) = self.sender.try_send(path.to_string()) {
                let mut paths = lock(&self.state.paths);
                if let Some(queue) = paths.get_mut(path) {
                    queue.pending.pop_back();
                    queue.draining = false;
                    if queue.pending.is_empty() {
                        paths.remove(path);
                    }
                }
                warn!("Notification queue full, rejected path {}: {}", path, e);
                return Err(Error::NotificationRejected(path.to_string()));
            }
        }

        Ok(())
    }

    /// Deliver a provider list on the calling task
    ///
    /// Goes through the same per-path queue as [`notify`](Self::notify): if a
    /// worker is already draining this path the snapshot is appended for it,
    /// otherwise it is drained inline before returning.
    pub fn notify_now(&self, path: &str, providers: Vec<Url>) {
        let drain_here = {
            let mut paths = lock(&self.state.paths);
            let queue = paths.entry(path.to_string()).or_default();
            queue.pending.push_back(providers);
            if queue.draining {
                false
            } else {
                queue.draining = true;
                true
            }
        };

        if drain_here {
            self.state.drain(path);
        }
    }

    /// Cached providers of a path, `None` when the path was never discovered
    pub fn cached(&self, path: &str) -> Option<Vec<Url>> {
        read(&self.state.provider_cache).get(path).cloned()
    }

    /// Register a listener for a consumer URL
    pub fn add_listener(&self, consumer_url: &Url, listener: Arc<dyn ProviderListener>) {
        let mut listeners = write(&self.state.listeners);
        let subscriptions = listeners.entry(consumer_url.path().to_string()).or_default();
        if !subscriptions
            .iter()
            .any(|s| Arc::ptr_eq(&s.listener, &listener) && s.consumer_url == *consumer_url)
        {
            subscriptions.push(Subscription {
                consumer_url: consumer_url.clone(),
                listener,
            });
        }
    }

    /// Remove a listener; returns `true` when no listener remains for the path
    pub fn remove_listener(&self, consumer_url: &Url, listener: &Arc<dyn ProviderListener>) -> bool {
        let mut listeners = write(&self.state.listeners);
        let path = consumer_url.path();
        let Some(subscriptions) = listeners.get_mut(path) else {
            return true;
        };
        subscriptions
            .retain(|s| !(Arc::ptr_eq(&s.listener, listener) && s.consumer_url == *consumer_url));
        if subscriptions.is_empty() {
            listeners.remove(path);
            true
        } else {
            false
        }
    }

    /// Number of listeners registered for a path
    pub fn listener_count(&self, path: &str) -> usize {
        read(&self.state.listeners).get(path).map_or(0, |s| s.len())
    }

    /// Paths with at least one listener
    pub fn subscribed_paths(&self) -> Vec<String> {
        read(&self.state.listeners).keys().cloned().collect()
    }

    /// Set or clear the global listener (last write wins)
    pub fn set_global_listener(&self, listener: Option<Arc<dyn GlobalProviderListener>>) {
        *write(&self.state.global_listener) = listener;
    }

    /// Whether a global listener is installed
    pub fn has_global_listener(&self) -> bool {
        read(&self.state.global_listener).is_some()
    }
}

impl NotifierState {
    /// Deliver every pending snapshot of `path`, oldest first
    fn drain(&self, path: &str) {
        loop {
            let next = {
                let mut paths = lock(&self.paths);
                let Some(queue) = paths.get_mut(path) else {
                    return;
                };
                match queue.pending.pop_front() {
                    Some(providers) => providers,
                    None => {
                        paths.remove(path);
                        return;
                    }
                }
            };
            self.deliver(path, next);
        }
    }

    fn deliver(&self, path: &str, providers: Vec<Url>) {
        {
            let mut cache = write(&self.provider_cache);
            if providers.is_empty() {
                cache.remove(path);
            } else {
                cache.insert(path.to_string(), providers.clone());
            }
        }

        let subscriptions = read(&self.listeners).get(path).cloned().unwrap_or_default();
        debug!(
            "Delivering {} providers of {} to {} listeners",
            providers.len(),
            path,
            subscriptions.len()
        );

        for subscription in subscriptions {
            let matching: Vec<Url> = providers
                .iter()
                .filter(|p| p.matches_consumer(&subscription.consumer_url))
                .cloned()
                .collect();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                subscription.listener.on_notify(
                    &self.registry_url,
                    &subscription.consumer_url,
                    matching,
                )
            }));
            if outcome.is_err() {
                error!("Provider listener for {} panicked", subscription.consumer_url);
            }
        }

        let global = read(&self.global_listener).clone();
        if let Some(global) = global {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                global.on_notify(&self.registry_url, path, providers)
            }));
            if outcome.is_err() {
                error!("Global provider listener panicked on path {}", path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{SmolSpawner, sleep};
    use std::time::Duration;

    fn registry_url() -> Url {
        Url::new("zookeeper", "127.0.0.1", 2181, "")
    }

    fn provider(port: u16) -> Url {
        Url::provider("luix", "10.0.0.1", port, "com.foo.Svc")
    }

    fn recording_listener() -> (Arc<dyn ProviderListener>, Arc<Mutex<Vec<Vec<u16>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn ProviderListener> =
            Arc::new(move |_: &Url, _: &Url, providers: Vec<Url>| {
                sink.lock()
                    .unwrap()
                    .push(providers.iter().map(|p| p.port()).collect());
            });
        (listener, seen)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_notify_now_updates_cache_and_listeners() {
        let notifier = Notifier::new(registry_url(), 1, 8, &SmolSpawner);
        let consumer = Url::consumer("luix", "c", 0, "com.foo.Svc");
        let (listener, seen) = recording_listener();
        notifier.add_listener(&consumer, listener);

        notifier.notify_now("com.foo.Svc", vec![provider(1), provider(2)]);
        assert_eq!(notifier.cached("com.foo.Svc").unwrap().len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2]]);

        // Empty list evicts rather than caching "no providers"
        notifier.notify_now("com.foo.Svc", vec![]);
        assert!(notifier.cached("com.foo.Svc").is_none());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[smol_potat::test]
    async fn test_same_path_delivered_in_order() {
        let notifier = Notifier::new(registry_url(), 4, 256, &SmolSpawner);
        let consumer = Url::consumer("luix", "c", 0, "com.foo.Svc");
        let (listener, seen) = recording_listener();
        notifier.add_listener(&consumer, listener);

        for port in 1..=50 {
            notifier.notify("com.foo.Svc", vec![provider(port)]).unwrap();
        }

        wait_for(|| seen.lock().unwrap().len() == 50).await;
        let ports: Vec<u16> = seen.lock().unwrap().iter().map(|v| v[0]).collect();
        assert_eq!(ports, (1..=50).collect::<Vec<_>>());
    }

    #[smol_potat::test]
    async fn test_global_listener_receives_full_list() {
        let notifier = Notifier::new(registry_url(), 2, 16, &SmolSpawner);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let global: Arc<dyn GlobalProviderListener> =
            Arc::new(move |_: &Url, path: &str, providers: Vec<Url>| {
                sink.lock().unwrap().push((path.to_string(), providers.len()));
            });
        notifier.set_global_listener(Some(global));

        notifier.notify("com.foo.Svc", vec![provider(1)]).unwrap();
        wait_for(|| !seen.lock().unwrap().is_empty()).await;
        assert_eq!(seen.lock().unwrap()[0], ("com.foo.Svc".to_string(), 1));

        notifier.set_global_listener(None);
        assert!(!notifier.has_global_listener());
    }

    #[test]
    fn test_removing_last_listener_removes_path() {
        let notifier = Notifier::new(registry_url(), 1, 8, &SmolSpawner);
        let consumer = Url::consumer("luix", "c", 0, "com.foo.Svc");
        let (first, _) = recording_listener();
        let (second, _) = recording_listener();
        notifier.add_listener(&consumer, first.clone());
        notifier.add_listener(&consumer, second.clone());
        // Adding the same listener twice keeps a single registration
        notifier.add_listener(&consumer, first.clone());
        assert_eq!(notifier.listener_count("com.foo.Svc"), 2);

        assert!(!notifier.remove_listener(&consumer, &first));
        assert!(notifier.remove_listener(&consumer, &second));
        assert!(notifier.subscribed_paths().is_empty());
    }

    #[test]
    fn test_backlog_overflow_is_rejected() {
        struct NoopSpawner;
        impl Spawner for NoopSpawner {
            fn spawn(&self, _task: crate::spawn::BoxTask) {}
        }

        // Workers never run, so the single queue slot stays occupied
        let notifier = Notifier::new(registry_url(), 1, 1, &NoopSpawner);
        notifier.notify("a", vec![provider(1)]).unwrap();
        assert!(matches!(
            notifier.notify("a", vec![provider(2)]),
            Err(Error::NotificationRejected(_))
        ));
        assert!(matches!(
            notifier.notify("b", vec![provider(3)]),
            Err(Error::NotificationRejected(_))
        ));
    }

    #[smol_potat::test]
    async fn test_rejected_path_accepts_later_snapshot() {
        let workers = crate::spawn::HeldSpawner::default();
        let notifier = Notifier::new(registry_url(), 1, 1, &workers);
        let consumer = Url::consumer("luix", "c", 0, "com.foo.Svc");
        let (listener, seen) = recording_listener();
        notifier.add_listener(&consumer, listener);

        notifier.notify("com.foo.Other", vec![provider(1)]).unwrap();
        assert!(notifier.notify("com.foo.Svc", vec![provider(2)]).is_err());

        workers.release();
        wait_for(|| notifier.cached("com.foo.Other").is_some()).await;
        notifier.notify("com.foo.Svc", vec![provider(3)]).unwrap();
        wait_for(|| !seen.lock().unwrap().is_empty()).await;

        // The dropped snapshot never reaches listeners
        assert_eq!(*seen.lock().unwrap(), vec![vec![3]]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let notifier = Notifier::new(registry_url(), 1, 8, &SmolSpawner);
        let consumer = Url::consumer("luix", "c", 0, "com.foo.Svc");
        let bad: Arc<dyn ProviderListener> =
            Arc::new(|_: &Url, _: &Url, _: Vec<Url>| panic!("listener failure"));
        let (good, seen) = recording_listener();
        notifier.add_listener(&consumer, bad);
        notifier.add_listener(&consumer, good);

        notifier.notify_now("com.foo.Svc", vec![provider(7)]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![7]]);
    }
}
