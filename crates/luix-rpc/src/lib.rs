//! RPC invocation core of the luix framework
//!
//! Providers export [`ServiceHandler`]s through a [`ProviderExporter`]: the
//! handlers are routed per interface, served by a TCP server that several
//! providers may share, and published to every configured registry.
//! Consumers build a [`ConsumerStub`], which subscribes a cluster invoker to
//! the registries (or to fixed addresses) and hands out a [`ServiceProxy`]
//! for calls. Every call is tracked by a [`ResponseFuture`].
//!
//! # Example
//!
//! ```no_run
//! use luix_registry::{RegistryConfig, SmolSpawner};
//! use luix_rpc::{ConsumerStub, LuixConfig, LuixRuntime, TypeDescriptor};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> luix_rpc::Result<()> {
//! let runtime = LuixRuntime::new(Arc::new(SmolSpawner));
//! let mut config = LuixConfig::new("demo");
//! config.registries.push(RegistryConfig::new("zookeeper", "127.0.0.1", 2181));
//!
//! let mut stub = ConsumerStub::new("com.luix.Echo", &config).retry_count(1);
//! let proxy = stub.init()?;
//! stub.subscribe_providers(&runtime, None).await?;
//!
//! let reply: String = proxy
//!     .call("echo", &["String"], vec![json!("hi")], &TypeDescriptor::Text)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod context;
pub mod default_value;
pub mod endpoint;
pub mod error;
pub mod future;
pub mod limiter;
pub mod message;
pub mod provider;
pub mod runtime;
pub mod serializer;
pub mod server;

pub use client::Requester;
pub use cluster::ClusterInvoker;
pub use config::LuixConfig;
pub use consumer::{ConsumerStub, ServiceProxy, StubState};
pub use context::RequestContext;
pub use default_value::{TypeDescriptor, default_value};
pub use endpoint::EndpointFactory;
pub use error::{Error, Result};
pub use future::{FutureState, ResponseFuture};
pub use message::{RemoteError, Request, Response};
pub use provider::ProviderExporter;
pub use runtime::LuixRuntime;
pub use server::{
    MessageHandler, Server,
    router::{ProviderRouter, ServiceHandler},
};
