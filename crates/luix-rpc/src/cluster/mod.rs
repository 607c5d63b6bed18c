//! Cluster invocation: provider selection and retries over a requester

pub mod balance;
pub mod tolerance;

use crate::client::Requester;
use crate::error::{Error, Result};
use crate::message::Request;
use balance::LoadBalancer;
use luix_registry::{
    ProviderListener, Url,
    sync::{read, write},
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tolerance::FaultTolerance;
use tracing::info;

/// Invoker for one service interface across every known provider
///
/// Provider lists arrive through [`ProviderListener`] notifications, one list
/// per registry; calls see the merged view.
pub struct ClusterInvoker {
    interface_name: String,
    balancer: Arc<dyn LoadBalancer>,
    tolerance: Arc<dyn FaultTolerance>,
    requester: Arc<dyn Requester>,
    providers: RwLock<BTreeMap<String, Vec<Url>>>,
}

impl ClusterInvoker {
    /// Create an invoker without providers
    pub fn new(
        interface_name: impl Into<String>,
        balancer: Arc<dyn LoadBalancer>,
        tolerance: Arc<dyn FaultTolerance>,
        requester: Arc<dyn Requester>,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            balancer,
            tolerance,
            requester,
            providers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Interface served by this invoker
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Names of the load balancer and fault tolerance strategies in use
    pub fn strategy_names(&self) -> (&'static str, &'static str) {
        (self.balancer.name(), self.tolerance.name())
    }

    /// Merged provider list across registries
    pub fn providers(&self) -> Vec<Url> {
        let mut merged: Vec<Url> = Vec::new();
        for providers in read(&self.providers).values() {
            for provider in providers {
                if !merged.contains(provider) {
                    merged.push(provider.clone());
                }
            }
        }
        merged
    }

    /// Pick a provider, avoiding `excluded` unless nothing else is left
    pub fn select(&self, request: &Request, excluded: &[Url]) -> Result<Url> {
        let providers = self.providers();
        let candidates: Vec<Url> = providers
            .iter()
            .filter(|p| !excluded.contains(p))
            .cloned()
            .collect();
        let pool = if candidates.is_empty() {
            &providers
        } else {
            &candidates
        };
        self.balancer
            .select(pool, request)
            .ok_or_else(|| Error::NoProvider(self.interface_name.clone()))
    }

    /// Single attempt against one provider
    pub async fn call(&self, provider: &Url, request: Request) -> Result<Value> {
        let future = self.requester.send(provider, request).await?;
        future.wait().await
    }

    /// Run a call with the configured fault tolerance
    pub async fn invoke(&self, request: Request) -> Result<Value> {
        self.tolerance.invoke(self, request).await
    }

    /// Close the underlying requester
    pub fn close(&self) {
        self.requester.close();
    }
}

impl ProviderListener for ClusterInvoker {
    fn on_notify(&self, registry_url: &Url, _consumer_url: &Url, providers: Vec<Url>) {
        info!(
            "{} providers of {} from {}",
            providers.len(),
            self.interface_name,
            registry_url.address()
        );
        let mut known = write(&self.providers);
        if providers.is_empty() {
            known.remove(&registry_url.identity());
        } else {
            known.insert(registry_url.identity(), providers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::ResponseFuture;
    use crate::message::RemoteError;
    use async_trait::async_trait;
    use balance::{RoundRobinLoadBalancer, load_balancers};
    use luix_registry::{sync::lock, url::keys};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tolerance::{Failfast, Failover, fault_tolerances};

    /// Answers per provider host with a fixed outcome
    #[derive(Default)]
    struct ScriptedRequester {
        outcomes: HashMap<String, Result<Value>>,
        calls: Mutex<Vec<(String, u64)>>,
    }

    impl ScriptedRequester {
        fn with(mut self, host: &str, outcome: Result<Value>) -> Self {
            self.outcomes.insert(host.to_string(), outcome);
            self
        }

        fn hosts_called(&self) -> Vec<String> {
            lock(&self.calls).iter().map(|(h, _)| h.clone()).collect()
        }
    }

    #[async_trait]
    impl Requester for ScriptedRequester {
        async fn send(&self, provider: &Url, request: Request) -> Result<ResponseFuture> {
            lock(&self.calls).push((provider.host().to_string(), request.request_id));
            let future = ResponseFuture::new(request.request_id, Duration::from_secs(1));
            match self.outcomes.get(provider.host()) {
                Some(Ok(value)) => future.on_success(value.clone()),
                Some(Err(e)) => future.on_failure(e.clone()),
                None => future.on_failure(Error::network("unreachable")),
            };
            Ok(future)
        }

        fn close(&self) {}
    }

    fn provider(host: &str) -> Url {
        Url::new("luix", host, 8001, "com.foo.Svc")
    }

    fn invoker(
        requester: Arc<ScriptedRequester>,
        tolerance: Arc<dyn FaultTolerance>,
    ) -> ClusterInvoker {
        let invoker = ClusterInvoker::new(
            "com.foo.Svc",
            Arc::new(RoundRobinLoadBalancer::default()),
            tolerance,
            requester,
        );
        let registry = Url::new("zookeeper", "127.0.0.1", 2181, "");
        let consumer = Url::consumer("luix", "10.0.0.9", 0, "com.foo.Svc");
        invoker.on_notify(&registry, &consumer, vec![provider("a"), provider("b")]);
        invoker
    }

    fn request(retries: u64) -> Request {
        Request::new("com.foo.Svc", "get", vec![], vec![])
            .with_option(keys::RETRY_COUNT, retries.to_string())
    }

    #[smol_potat::test]
    async fn test_failover_moves_to_next_provider() {
        let requester = Arc::new(
            ScriptedRequester::default()
                .with("a", Err(Error::network("reset")))
                .with("b", Ok(json!("from b"))),
        );
        let invoker = invoker(requester.clone(), Arc::new(Failover));

        assert_eq!(invoker.invoke(request(1)).await.unwrap(), json!("from b"));
        assert_eq!(requester.hosts_called(), vec!["a", "b"]);

        let ids: Vec<u64> = lock(&requester.calls).iter().map(|(_, id)| *id).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[smol_potat::test]
    async fn test_failover_gives_up_after_retry_count() {
        let requester = Arc::new(
            ScriptedRequester::default()
                .with("a", Err(Error::Remote(RemoteError::new("Boom", "a"))))
                .with("b", Err(Error::Remote(RemoteError::new("Boom", "b")))),
        );
        let invoker = invoker(requester.clone(), Arc::new(Failover));

        let err = invoker.invoke(request(2)).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(requester.hosts_called().len(), 3);
    }

    #[smol_potat::test]
    async fn test_non_transient_errors_are_not_retried() {
        let requester = Arc::new(
            ScriptedRequester::default()
                .with("a", Err(Error::Decode("bad frame".into())))
                .with("b", Ok(json!(1))),
        );
        let invoker = invoker(requester.clone(), Arc::new(Failover));

        assert!(matches!(
            invoker.invoke(request(3)).await,
            Err(Error::Decode(_))
        ));
        assert_eq!(requester.hosts_called(), vec!["a"]);
    }

    #[smol_potat::test]
    async fn test_failover_skips_unreachable_provider() {
        let requester = Arc::new(
            ScriptedRequester::default()
                .with("a", Err(Error::Initialization("connection refused".into())))
                .with("b", Ok(json!("from b"))),
        );
        let invoker = invoker(requester.clone(), Arc::new(Failover));

        // No retries configured, yet the dead provider does not fail the call
        for _ in 0..4 {
            assert_eq!(invoker.invoke(request(0)).await.unwrap(), json!("from b"));
        }
        let hosts = requester.hosts_called();
        assert_eq!(hosts.iter().filter(|h| *h == "b").count(), 4);
    }

    #[smol_potat::test]
    async fn test_failover_reports_initialization_when_all_unreachable() {
        let requester = Arc::new(
            ScriptedRequester::default()
                .with("a", Err(Error::Initialization("refused a".into())))
                .with("b", Err(Error::Initialization("refused b".into()))),
        );
        let invoker = invoker(requester.clone(), Arc::new(Failover));

        assert!(matches!(
            invoker.invoke(request(3)).await,
            Err(Error::Initialization(_))
        ));
        assert_eq!(requester.hosts_called().len(), 2);
    }

    #[smol_potat::test]
    async fn test_failfast_single_attempt() {
        let requester =
            Arc::new(ScriptedRequester::default().with("a", Err(Error::network("reset"))));
        let invoker = invoker(requester.clone(), Arc::new(Failfast));

        assert!(invoker.invoke(request(5)).await.is_err());
        assert_eq!(requester.hosts_called().len(), 1);
    }

    #[smol_potat::test]
    async fn test_no_provider() {
        let requester = Arc::new(ScriptedRequester::default());
        let invoker = ClusterInvoker::new(
            "com.foo.Svc",
            load_balancers().create("random").unwrap(),
            fault_tolerances().create("failover").unwrap(),
            requester,
        );
        assert!(matches!(
            invoker.invoke(request(0)).await,
            Err(Error::NoProvider(_))
        ));
    }

    #[test]
    fn test_provider_lists_merge_per_registry() {
        let invoker = invoker(Arc::new(ScriptedRequester::default()), Arc::new(Failfast));
        let consumer = Url::consumer("luix", "10.0.0.9", 0, "com.foo.Svc");
        let other = Url::new("consul", "127.0.0.1", 8500, "");

        invoker.on_notify(&other, &consumer, vec![provider("b"), provider("c")]);
        assert_eq!(invoker.providers().len(), 3);

        invoker.on_notify(&other, &consumer, vec![]);
        assert_eq!(invoker.providers().len(), 2);
        assert_eq!(invoker.strategy_names(), ("roundRobin", "failfast"));
    }
}
