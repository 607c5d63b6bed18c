//! Runtime-agnostic service registry for the luix RPC framework
//!
//! This crate tracks live providers and consumers across a cluster and
//! propagates provider-set changes to subscribed consumers.
//!
//! # Architecture
//!
//! - [`Url`] describes every endpoint; equality only looks at identity
//!   components so option changes do not fragment caches.
//! - [`Registry`] is the backend-independent template: it copies and strips
//!   URLs, tracks what this process registered, and serves cache-first
//!   discovery.
//! - [`RegistryBackend`] implementations do the backend I/O. Two ship with
//!   the crate: a watch-push tree backend ([`backend::tree`]) and a
//!   poll-diff catalog backend with TTL heartbeats ([`backend::catalog`]).
//! - [`Notifier`] delivers provider lists to listeners on a bounded worker
//!   pool, one in-flight delivery per path.
//!
//! # Example
//!
//! ```no_run
//! use luix_registry::{RegistryConfig, RegistryFactory, SmolSpawner, Url};
//! use std::sync::Arc;
//!
//! # async fn example() -> luix_registry::Result<()> {
//! let factory = RegistryFactory::new(Arc::new(SmolSpawner));
//! let registry = factory.get_registry(&RegistryConfig::new("zookeeper", "127.0.0.1", 2181))?;
//!
//! let provider = Url::parse("luix://10.0.0.1:8001/com.foo.Svc?form=f1&version=1.0")?;
//! registry.register(&provider).await?;
//! registry.activate(Some(&provider)).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod factory;
pub mod listener;
pub mod notify;
pub mod registry;
pub mod spawn;
pub mod strategy;
pub mod sync;
pub mod url;

pub use backend::RegistryBackend;
pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use factory::RegistryFactory;
pub use listener::{GlobalProviderListener, ProviderListener};
pub use notify::Notifier;
pub use registry::Registry;
pub use spawn::{SmolSpawner, Spawner};
pub use strategy::Strategies;
pub use url::Url;
