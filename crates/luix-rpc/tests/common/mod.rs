//! Shared fixtures for rpc integration tests

#![allow(dead_code)]

use luix_registry::{RegistryConfig, SmolSpawner, spawn::sleep};
use luix_rpc::{
    ConsumerStub, LuixConfig, LuixRuntime, ProviderExporter, RemoteError, ServiceHandler,
    ServiceProxy,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for waiting on asynchronous propagation
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interface of the echo fixture
pub const ECHO: &str = "com.foo.Echo";

/// Fresh runtime with the in-process registry backends
pub fn runtime() -> Arc<LuixRuntime> {
    Arc::new(LuixRuntime::new(Arc::new(SmolSpawner)))
}

/// Configuration on an ephemeral port with one tree registry
pub fn config() -> LuixConfig {
    let mut config = LuixConfig::new("it");
    config.registries = vec![RegistryConfig::new("zookeeper", "127.0.0.1", 2181)];
    config
}

/// Echo service with a failing method, a slow method and a trace echo
pub fn echo_service(interface: &str) -> ServiceHandler {
    ServiceHandler::new(interface)
        .method("echo", &["String"], |args: Vec<Value>, _ctx| async move {
            args.into_iter()
                .next()
                .ok_or_else(|| RemoteError::new("IllegalArgument", "missing argument"))
        })
        .method("fail", &[], |_args: Vec<Value>, _ctx| async move {
            Err(RemoteError::new("IllegalState", "always fails"))
        })
        .method("slow", &["long"], |args: Vec<Value>, _ctx| async move {
            let millis = args.first().and_then(Value::as_u64).unwrap_or(0);
            sleep(Duration::from_millis(millis)).await;
            Ok(Value::from(millis))
        })
        .method("trace", &[], |_args: Vec<Value>, ctx| async move {
            Ok(Value::from(ctx.trace_id().to_string()))
        })
}

/// Exporter over `runtime` with [`config`]
pub fn exporter(runtime: &Arc<LuixRuntime>) -> ProviderExporter {
    ProviderExporter::new(runtime.clone(), config()).unwrap()
}

/// Initialized and subscribed stub
pub async fn subscribed(
    runtime: &LuixRuntime,
    stub: ConsumerStub,
) -> (ConsumerStub, Arc<ServiceProxy>) {
    let mut stub = stub;
    let proxy = stub.init().unwrap();
    stub.subscribe_providers(runtime, None).await.unwrap();
    (stub, proxy)
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
