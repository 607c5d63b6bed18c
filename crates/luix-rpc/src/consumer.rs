//! Consumer stubs and the proxies they hand out
//!
//! A [`ConsumerStub`] walks through three states:
//!
//! 1. `Uninitialized`: configuration is bound, defaults come from
//!    [`LuixConfig`].
//! 2. `ProxyBound`: [`init`](ConsumerStub::init) created the
//!    [`ServiceProxy`]; calls fail until providers are subscribed.
//! 3. `Subscribed`: [`subscribe_providers`](ConsumerStub::subscribe_providers)
//!    built the cluster invoker and either subscribed it to the configured
//!    registries or, in direct mode, fed it synthetic provider URLs.

use crate::cluster::ClusterInvoker;
use crate::config::LuixConfig;
use crate::context::RequestContext;
use crate::default_value::{TypeDescriptor, default_value};
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::message::Request;
use crate::runtime::LuixRuntime;
use luix_registry::{
    GlobalProviderListener, ProviderListener, RegistryConfig, Url,
    url::{DEFAULT_PROTOCOL, NONE_PROTOCOL, keys},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Lifecycle state of a stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubState {
    /// Configured only
    Uninitialized,
    /// Proxy created, no providers yet
    ProxyBound,
    /// Providers subscribed; calls are served
    Subscribed,
}

/// Invocation handler behind a service interface
pub struct ServiceProxy {
    interface_name: String,
    form: Option<String>,
    version: Option<String>,
    request_timeout_ms: u64,
    retry_count: u64,
    throw_exception: bool,
    limiter: Option<RateLimiter>,
    invoker: OnceLock<Arc<ClusterInvoker>>,
}

impl ServiceProxy {
    /// Interface this proxy implements
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Invoker, once providers are subscribed
    pub fn invoker(&self) -> Option<&Arc<ClusterInvoker>> {
        self.invoker.get()
    }

    /// Call a remote method with a fresh request context
    pub async fn invoke(
        &self,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
        return_type: &TypeDescriptor,
    ) -> Result<Value> {
        self.invoke_with_context(
            &RequestContext::new(),
            method,
            parameter_types,
            arguments,
            return_type,
        )
        .await
    }

    /// Call a remote method within an existing request context
    ///
    /// When exceptions are suppressed for this stub, any failure yields the
    /// zero value of `return_type` instead of an error.
    pub async fn invoke_with_context(
        &self,
        context: &RequestContext,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
        return_type: &TypeDescriptor,
    ) -> Result<Value> {
        let outcome = self
            .dispatch(context, method, parameter_types, arguments)
            .await;
        match outcome {
            Ok(value) => Ok(value),
            Err(e) if self.throw_exception => Err(e),
            Err(e) => {
                warn!(
                    "{}.{} failed, returning default value: {}",
                    self.interface_name, method, e
                );
                Ok(default_value(return_type))
            }
        }
    }

    /// Typed [`invoke`](Self::invoke)
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
        return_type: &TypeDescriptor,
    ) -> Result<T> {
        let value = self
            .invoke(method, parameter_types, arguments, return_type)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn dispatch(
        &self,
        context: &RequestContext,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
    ) -> Result<Value> {
        let invoker = self.invoker.get().ok_or_else(|| {
            Error::configuration(format!(
                "Consumer stub for {} has no subscribed providers",
                self.interface_name
            ))
        })?;
        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire() {
                return Err(Error::RateLimited(self.interface_name.clone()));
            }
        }

        let request = self.build_request(context, method, parameter_types, arguments);
        debug!(
            "Invoking {} as request {}",
            request.signature(),
            request.request_id
        );
        invoker.invoke(request).await
    }

    fn build_request(
        &self,
        context: &RequestContext,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
    ) -> Request {
        let mut request = Request::new(
            self.interface_name.clone(),
            method,
            parameter_types.iter().map(|p| p.to_string()).collect(),
            arguments,
        )
        .with_option(keys::REQUEST_TIMEOUT, self.request_timeout_ms.to_string())
        .with_option(keys::RETRY_COUNT, self.retry_count.to_string());
        if let Some(form) = &self.form {
            request = request.with_option(keys::FORM, form.clone());
        }
        if let Some(version) = &self.version {
            request = request.with_option(keys::VERSION, version.clone());
        }
        context.apply(&mut request);
        request
    }
}

/// Builds, subscribes and owns the proxy for one service interface
pub struct ConsumerStub {
    interface_name: String,
    application: String,
    host: String,
    protocol: String,
    invoker_name: String,
    serializer: String,
    form: Option<String>,
    version: Option<String>,
    request_timeout_ms: u64,
    retry_count: u64,
    fault_tolerance: String,
    load_balancer: String,
    throw_exception: bool,
    rate_limit: Option<f64>,
    provider_addresses: Vec<String>,
    registries: Vec<RegistryConfig>,
    state: StubState,
    proxy: Option<Arc<ServiceProxy>>,
    invoker: Option<Arc<ClusterInvoker>>,
}

impl ConsumerStub {
    /// Stub for an interface with defaults taken from `config`
    pub fn new(interface_name: impl Into<String>, config: &LuixConfig) -> Self {
        Self {
            interface_name: interface_name.into(),
            application: config.application.id.clone(),
            host: config.protocol.host.clone(),
            protocol: config.protocol.name.clone(),
            invoker_name: config.invoker_name().to_string(),
            serializer: config.protocol.serializer.clone(),
            form: None,
            version: None,
            request_timeout_ms: config.protocol.request_timeout_ms,
            retry_count: config.protocol.retry_count,
            fault_tolerance: config.consumer.fault_tolerance.clone(),
            load_balancer: config.consumer.load_balancer.clone(),
            throw_exception: config.protocol.throw_exception,
            rate_limit: config
                .consumer
                .rate_limit_enabled
                .then_some(config.consumer.rate_limit_permits_per_second),
            provider_addresses: Vec::new(),
            registries: config.registries.clone(),
            state: StubState::Uninitialized,
            proxy: None,
            invoker: None,
        }
    }

    /// Restrict to providers of a form
    pub fn form(mut self, form: impl Into<String>) -> Self {
        self.form = Some(form.into());
        self
    }

    /// Restrict to providers of a version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Per-call timeout
    pub fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Retries after the first attempt
    pub fn retry_count(mut self, retry_count: u64) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Fault tolerance strategy name
    pub fn fault_tolerance(mut self, name: impl Into<String>) -> Self {
        self.fault_tolerance = name.into();
        self
    }

    /// Load balancer name
    pub fn load_balancer(mut self, name: impl Into<String>) -> Self {
        self.load_balancer = name.into();
        self
    }

    /// Serializer name
    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    /// Whether failures raise errors or yield zero values
    pub fn throw_exception(mut self, throw_exception: bool) -> Self {
        self.throw_exception = throw_exception;
        self
    }

    /// Limit calls per second
    pub fn rate_limit(mut self, permits_per_second: f64) -> Self {
        self.rate_limit = Some(permits_per_second);
        self
    }

    /// Connect straight to `host:port` providers (comma separated),
    /// bypassing every registry
    pub fn provider_addresses(mut self, addresses: &str) -> Self {
        self.provider_addresses = addresses
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    /// Registries to discover providers from
    pub fn registries(mut self, registries: Vec<RegistryConfig>) -> Self {
        self.registries = registries;
        self
    }

    /// Current state
    pub fn state(&self) -> StubState {
        self.state
    }

    /// Proxy, once initialized
    pub fn proxy(&self) -> Option<Arc<ServiceProxy>> {
        self.proxy.clone()
    }

    /// Cluster invoker, once subscribed
    pub fn invoker(&self) -> Option<Arc<ClusterInvoker>> {
        self.invoker.clone()
    }

    /// Whether the stub bypasses registries
    pub fn is_direct(&self) -> bool {
        !self.provider_addresses.is_empty()
    }

    /// Consumer URL carrying the stub settings as options
    pub fn consumer_url(&self) -> Url {
        let mut url = Url::consumer(self.protocol.clone(), self.host.clone(), 0, self.interface_name.clone())
            .with_option(keys::APP, self.application.clone())
            .with_option(keys::SERIALIZER, self.serializer.clone())
            .with_option(keys::REQUEST_TIMEOUT, self.request_timeout_ms.to_string())
            .with_option(keys::RETRY_COUNT, self.retry_count.to_string())
            .with_option(keys::FAULT_TOLERANCE, self.fault_tolerance.clone())
            .with_option(keys::LOAD_BALANCER, self.load_balancer.clone())
            .with_option(keys::THROW_EXCEPTION, self.throw_exception.to_string());
        if let Some(form) = &self.form {
            url.add_option(keys::FORM, form.clone());
        }
        if let Some(version) = &self.version {
            url.add_option(keys::VERSION, version.clone());
        }
        url
    }

    /// Create the proxy
    pub fn init(&mut self) -> Result<Arc<ServiceProxy>> {
        if self.state != StubState::Uninitialized {
            return Err(Error::configuration(format!(
                "Consumer stub for {} is already initialized",
                self.interface_name
            )));
        }
        if self.interface_name.trim().is_empty() {
            return Err(Error::configuration("consumer interface name is required"));
        }

        let proxy = Arc::new(ServiceProxy {
            interface_name: self.interface_name.clone(),
            form: self.form.clone(),
            version: self.version.clone(),
            request_timeout_ms: self.request_timeout_ms,
            retry_count: self.retry_count,
            throw_exception: self.throw_exception,
            limiter: self.rate_limit.map(RateLimiter::new),
            invoker: OnceLock::new(),
        });
        self.proxy = Some(proxy.clone());
        self.state = StubState::ProxyBound;
        Ok(proxy)
    }

    /// Build the invoker and connect it to its providers
    pub async fn subscribe_providers(
        &mut self,
        runtime: &LuixRuntime,
        global_listener: Option<Arc<dyn GlobalProviderListener>>,
    ) -> Result<()> {
        let proxy = match (self.state, &self.proxy) {
            (StubState::ProxyBound, Some(proxy)) => proxy.clone(),
            _ => {
                return Err(Error::configuration(format!(
                    "Consumer stub for {} must be initialized once before subscribing (state {:?})",
                    self.interface_name, self.state
                )));
            }
        };
        if !self.is_direct() && self.registries.is_empty() {
            return Err(Error::configuration(format!(
                "No registry or provider address configured for {}",
                self.interface_name
            )));
        }

        let consumer_url = self.consumer_url();
        let requester = runtime
            .endpoint_factory(&self.invoker_name)?
            .create_requester(&consumer_url)?;
        let invoker = Arc::new(ClusterInvoker::new(
            self.interface_name.clone(),
            runtime.load_balancer(&self.load_balancer)?,
            runtime.fault_tolerance(&self.fault_tolerance)?,
            requester,
        ));

        if self.is_direct() {
            self.notify_direct(&invoker, &consumer_url, global_listener)?;
        } else {
            for config in &self.registries {
                let registry = runtime.registries().get_registry(config)?;
                registry.register(&consumer_url).await?;
                registry.activate(Some(&consumer_url)).await?;
                if let Some(listener) = &global_listener {
                    registry.subscribe_global(listener.clone());
                }
                let listener: Arc<dyn ProviderListener> = invoker.clone();
                registry.subscribe(&consumer_url, listener).await?;
                info!(
                    "Consumer of {} subscribed to {}",
                    self.interface_name,
                    registry.url().address()
                );
            }
        }

        // init() creates a fresh proxy and this is the only place binding it
        let _ = proxy.invoker.set(invoker.clone());
        self.invoker = Some(invoker);
        self.state = StubState::Subscribed;
        Ok(())
    }

    fn direct_providers(&self) -> Result<Vec<Url>> {
        self.provider_addresses
            .iter()
            .map(|address| {
                let (host, port) = address
                    .rsplit_once(':')
                    .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
                    .ok_or_else(|| {
                        Error::configuration(format!("Invalid provider address '{}'", address))
                    })?;
                let mut url = Url::provider(DEFAULT_PROTOCOL, host, port, self.interface_name.clone())
                    .with_option(keys::SERIALIZER, self.serializer.clone());
                if let Some(form) = &self.form {
                    url.add_option(keys::FORM, form.clone());
                }
                if let Some(version) = &self.version {
                    url.add_option(keys::VERSION, version.clone());
                }
                Ok(url)
            })
            .collect()
    }

    fn notify_direct(
        &self,
        invoker: &ClusterInvoker,
        consumer_url: &Url,
        global_listener: Option<Arc<dyn GlobalProviderListener>>,
    ) -> Result<()> {
        let providers = self.direct_providers()?;
        let registry_url = Url::new(NONE_PROTOCOL, self.host.clone(), 0, "");
        info!(
            "Consumer of {} bound directly to {} providers",
            self.interface_name,
            providers.len()
        );

        invoker.on_notify(&registry_url, consumer_url, providers.clone());
        if let Some(listener) = global_listener {
            listener.on_notify(&registry_url, &self.interface_name, providers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luix_registry::{RegistryFactory, SmolSpawner, sync::lock};
    use serde_json::json;
    use std::sync::Mutex;

    fn runtime_without_registries() -> LuixRuntime {
        LuixRuntime::with_registries(
            Arc::new(SmolSpawner),
            RegistryFactory::empty(Arc::new(SmolSpawner)),
        )
    }

    #[smol_potat::test]
    async fn test_direct_mode_bypasses_registries() {
        let runtime = runtime_without_registries();
        let seen: Arc<Mutex<Vec<(String, String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let global: Arc<dyn GlobalProviderListener> =
            Arc::new(move |registry: &Url, path: &str, providers: Vec<Url>| {
                lock(&sink).push((
                    registry.protocol().to_string(),
                    path.to_string(),
                    providers.len(),
                ));
            });

        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("10.0.0.2:9000, 10.0.0.3:9000");
        stub.init().unwrap();
        stub.subscribe_providers(&runtime, Some(global)).await.unwrap();

        let providers = stub.invoker().unwrap().providers();
        assert_eq!(providers.len(), 2);
        for (provider, host) in providers.iter().zip(["10.0.0.2", "10.0.0.3"]) {
            assert_eq!(provider.protocol(), DEFAULT_PROTOCOL);
            assert_eq!(provider.host(), host);
            assert_eq!(provider.port(), 9000);
            assert_eq!(provider.path(), "com.foo.Svc");
        }
        assert_eq!(
            *lock(&seen),
            vec![(NONE_PROTOCOL.to_string(), "com.foo.Svc".to_string(), 2)]
        );
        assert!(runtime.registries().registries().is_empty());
        assert_eq!(stub.state(), StubState::Subscribed);
    }

    #[smol_potat::test]
    async fn test_out_of_order_transitions() {
        let runtime = runtime_without_registries();
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("10.0.0.2:9000");

        assert!(matches!(
            stub.subscribe_providers(&runtime, None).await,
            Err(Error::Configuration(_))
        ));
        let proxy = stub.init().unwrap();
        assert!(stub.init().is_err());

        let unsubscribed = proxy
            .invoke("get", &[], vec![], &TypeDescriptor::Integer)
            .await;
        assert!(matches!(unsubscribed, Err(Error::Configuration(_))));

        stub.subscribe_providers(&runtime, None).await.unwrap();
        assert!(stub.subscribe_providers(&runtime, None).await.is_err());
    }

    #[smol_potat::test]
    async fn test_invalid_address() {
        let runtime = runtime_without_registries();
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("10.0.0.2");
        stub.init().unwrap();
        assert!(matches!(
            stub.subscribe_providers(&runtime, None).await,
            Err(Error::Configuration(ref m)) if m.contains("10.0.0.2")
        ));
    }

    #[smol_potat::test]
    async fn test_requires_registry_or_addresses() {
        let runtime = runtime_without_registries();
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"));
        stub.init().unwrap();
        assert!(matches!(
            stub.subscribe_providers(&runtime, None).await,
            Err(Error::Configuration(_))
        ));
    }

    #[smol_potat::test]
    async fn test_suppressed_failures_return_default_values() {
        let runtime = runtime_without_registries();
        // Nothing listens on port 1, so the first connect fails
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("127.0.0.1:1")
            .throw_exception(false);
        let proxy = stub.init().unwrap();
        stub.subscribe_providers(&runtime, None).await.unwrap();

        let value = proxy
            .invoke("count", &[], vec![], &TypeDescriptor::Integer)
            .await
            .unwrap();
        assert_eq!(value, json!(0));

        let names: Vec<String> = proxy
            .call("names", &[], vec![], &TypeDescriptor::list(TypeDescriptor::Text))
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[smol_potat::test]
    async fn test_first_connect_failure_is_initialization_error() {
        let runtime = runtime_without_registries();
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("127.0.0.1:1");
        let proxy = stub.init().unwrap();
        stub.subscribe_providers(&runtime, None).await.unwrap();

        assert!(matches!(
            proxy.invoke("count", &[], vec![], &TypeDescriptor::Integer).await,
            Err(Error::Initialization(_))
        ));
    }

    #[smol_potat::test]
    async fn test_rate_limited() {
        let runtime = runtime_without_registries();
        let mut stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .provider_addresses("127.0.0.1:1")
            .rate_limit(0.0);
        let proxy = stub.init().unwrap();
        stub.subscribe_providers(&runtime, None).await.unwrap();

        assert!(matches!(
            proxy.invoke("count", &[], vec![], &TypeDescriptor::Integer).await,
            Err(Error::RateLimited(_))
        ));
    }

    #[test]
    fn test_consumer_url_options() {
        let stub = ConsumerStub::new("com.foo.Svc", &LuixConfig::new("demo"))
            .form("f1")
            .version("1.0")
            .retry_count(2);
        let url = stub.consumer_url();

        assert!(url.is_consumer());
        assert_eq!(url.form(), Some("f1"));
        assert_eq!(url.version(), Some("1.0"));
        assert_eq!(url.option(keys::RETRY_COUNT), Some("2"));
        assert_eq!(url.option(keys::APP), Some("demo"));
    }
}
