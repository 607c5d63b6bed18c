//! End-to-end calls over real sockets and the in-process registries

mod common;

use common::*;
use luix_rpc::{
    ConsumerStub, Error, LuixConfig, ProviderExporter, RequestContext, TypeDescriptor,
    server::{health::HEALTH_METHOD, router::METHOD_NOT_FOUND},
};
use serde_json::json;

#[smol_potat::test]
async fn test_call_through_registry() {
    let runtime = runtime();
    let exporter = exporter(&runtime);
    exporter.export(echo_service(ECHO), None, None).await.unwrap();

    let (stub, proxy) = subscribed(&runtime, ConsumerStub::new(ECHO, &config())).await;
    let invoker = stub.invoker().unwrap();
    assert!(eventually(|| !invoker.providers().is_empty()).await);

    let reply: String = proxy
        .call("echo", &["String"], vec![json!("hi")], &TypeDescriptor::Text)
        .await
        .unwrap();
    assert_eq!(reply, "hi");
}

#[smol_potat::test]
async fn test_provider_arriving_after_subscription() {
    let runtime = runtime();
    let (stub, proxy) = subscribed(&runtime, ConsumerStub::new(ECHO, &config())).await;
    let invoker = stub.invoker().unwrap();
    assert!(invoker.providers().is_empty());

    let exporter = exporter(&runtime);
    let url = exporter.export(echo_service(ECHO), None, None).await.unwrap();
    assert!(eventually(|| invoker.providers() == vec![url.clone()]).await);

    let reply = proxy
        .invoke("echo", &["String"], vec![json!(7)], &TypeDescriptor::Integer)
        .await
        .unwrap();
    assert_eq!(reply, json!(7));

    exporter.unexport(&url).await.unwrap();
    assert!(eventually(|| invoker.providers().is_empty()).await);
    assert!(matches!(
        proxy
            .invoke("echo", &["String"], vec![json!(7)], &TypeDescriptor::Integer)
            .await,
        Err(Error::NoProvider(_))
    ));
}

#[smol_potat::test]
async fn test_shared_channel_serves_two_services() {
    let runtime = runtime();
    let exporter = exporter(&runtime);
    let first = exporter.export(echo_service("com.foo.A"), None, None).await.unwrap();
    let second = exporter.export(echo_service("com.foo.B"), None, None).await.unwrap();
    assert_eq!(first.address(), second.address());

    for interface in ["com.foo.A", "com.foo.B"] {
        let (stub, proxy) = subscribed(&runtime, ConsumerStub::new(interface, &config())).await;
        let invoker = stub.invoker().unwrap();
        assert!(eventually(|| !invoker.providers().is_empty()).await);

        let reply = proxy
            .invoke("echo", &["String"], vec![json!(interface)], &TypeDescriptor::Text)
            .await
            .unwrap();
        assert_eq!(reply, json!(interface));
        let health = proxy
            .invoke(HEALTH_METHOD, &[], vec![], &TypeDescriptor::Text)
            .await
            .unwrap();
        assert_eq!(health, json!("ok"));
    }

    assert!(!exporter.unexport(&first).await.unwrap());
    assert_eq!(runtime.shared_servers().server_count(), 1);
    assert!(exporter.unexport(&second).await.unwrap());
    assert_eq!(runtime.shared_servers().server_count(), 0);
}

#[smol_potat::test]
async fn test_incompatible_shared_server_is_rejected() {
    let runtime = runtime();
    exporter(&runtime)
        .export(echo_service("com.foo.A"), None, None)
        .await
        .unwrap();

    let mut yaml = config();
    yaml.protocol.serializer = "yaml".to_string();
    let other = ProviderExporter::new(runtime.clone(), yaml).unwrap();
    assert!(matches!(
        other.export(echo_service("com.foo.B"), None, None).await,
        Err(Error::Configuration(ref m)) if m.contains("serializer")
    ));
    assert_eq!(runtime.router().service_names(), vec!["com.foo.A".to_string()]);
}

#[smol_potat::test]
async fn test_remote_errors() {
    let runtime = runtime();
    exporter(&runtime)
        .export(echo_service(ECHO), None, None)
        .await
        .unwrap();
    let (stub, proxy) = subscribed(&runtime, ConsumerStub::new(ECHO, &config())).await;
    let invoker = stub.invoker().unwrap();
    assert!(eventually(|| !invoker.providers().is_empty()).await);

    match proxy.invoke("fail", &[], vec![], &TypeDescriptor::Unit).await {
        Err(Error::Remote(e)) => assert_eq!(e.kind, "IllegalState"),
        other => panic!("unexpected {:?}", other),
    }
    match proxy.invoke("missing", &[], vec![], &TypeDescriptor::Unit).await {
        Err(Error::Remote(e)) => assert_eq!(e.kind, METHOD_NOT_FOUND),
        other => panic!("unexpected {:?}", other),
    }
}

#[smol_potat::test]
async fn test_timeout_and_default_value() {
    let runtime = runtime();
    exporter(&runtime)
        .export(echo_service(ECHO), None, None)
        .await
        .unwrap();

    let (stub, strict) = subscribed(
        &runtime,
        ConsumerStub::new(ECHO, &config()).request_timeout_ms(100),
    )
    .await;
    let invoker = stub.invoker().unwrap();
    assert!(eventually(|| !invoker.providers().is_empty()).await);
    assert!(matches!(
        strict
            .invoke("slow", &["long"], vec![json!(500)], &TypeDescriptor::Integer)
            .await,
        Err(Error::Timeout { .. })
    ));

    let (stub, lenient) = subscribed(
        &runtime,
        ConsumerStub::new(ECHO, &config())
            .request_timeout_ms(100)
            .throw_exception(false),
    )
    .await;
    let invoker = stub.invoker().unwrap();
    assert!(eventually(|| !invoker.providers().is_empty()).await);
    let value = lenient
        .invoke("slow", &["long"], vec![json!(500)], &TypeDescriptor::Integer)
        .await
        .unwrap();
    assert_eq!(value, json!(0));
}

#[smol_potat::test]
async fn test_trace_id_reaches_provider() {
    let runtime = runtime();
    exporter(&runtime)
        .export(echo_service(ECHO), None, None)
        .await
        .unwrap();
    let (stub, proxy) = subscribed(&runtime, ConsumerStub::new(ECHO, &config())).await;
    let invoker = stub.invoker().unwrap();
    assert!(eventually(|| !invoker.providers().is_empty()).await);

    let reply = proxy
        .invoke_with_context(
            &RequestContext::with_trace_id("trace-42"),
            "trace",
            &[],
            vec![],
            &TypeDescriptor::Text,
        )
        .await
        .unwrap();
    assert_eq!(reply, json!("trace-42"));
}

#[smol_potat::test]
async fn test_direct_addresses_skip_registries() {
    let runtime = runtime();
    let url = exporter(&runtime)
        .export(echo_service(ECHO), None, None)
        .await
        .unwrap();

    let (stub, proxy) = subscribed(
        &runtime,
        ConsumerStub::new(ECHO, &LuixConfig::new("direct")).provider_addresses(&url.address()),
    )
    .await;
    assert_eq!(stub.invoker().unwrap().providers().len(), 1);

    let reply = proxy
        .invoke("echo", &["String"], vec![json!("direct")], &TypeDescriptor::Text)
        .await
        .unwrap();
    assert_eq!(reply, json!("direct"));
}

#[smol_potat::test]
async fn test_versions_are_isolated() {
    let runtime = runtime();
    exporter(&runtime)
        .export(echo_service(ECHO), None, Some("1.0"))
        .await
        .unwrap();

    let (stub, _proxy) = subscribed(&runtime, ConsumerStub::new(ECHO, &config()).version("2.0")).await;
    let (matching, _) = subscribed(&runtime, ConsumerStub::new(ECHO, &config()).version("1.0")).await;
    let matching = matching.invoker().unwrap();
    assert!(eventually(|| !matching.providers().is_empty()).await);
    assert!(stub.invoker().unwrap().providers().is_empty());
}

#[smol_potat::test]
async fn test_unreachable_direct_address_is_skipped() {
    let runtime = runtime();
    let url = exporter(&runtime)
        .export(echo_service(ECHO), None, None)
        .await
        .unwrap();

    let addresses = format!("127.0.0.1:1,{}", url.address());
    let (stub, proxy) = subscribed(
        &runtime,
        ConsumerStub::new(ECHO, &LuixConfig::new("direct"))
            .provider_addresses(&addresses)
            .load_balancer("roundRobin"),
    )
    .await;
    assert_eq!(stub.invoker().unwrap().providers().len(), 2);

    for round in 0..4 {
        let reply = proxy
            .invoke("echo", &["String"], vec![json!(round)], &TypeDescriptor::Integer)
            .await
            .unwrap();
        assert_eq!(reply, json!(round));
    }
}
