//! Provider side wiring: route, serve and publish services

use crate::config::LuixConfig;
use crate::error::{Error, Result};
use crate::runtime::LuixRuntime;
use crate::server::{MessageHandler, Server, router::ProviderRouter, router::ServiceHandler};
use luix_registry::{Registry, Url, sync::lock, url::keys};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

struct Exported {
    bind_url: Url,
    url: Url,
    server: Arc<dyn Server>,
}

/// Exports services of one process through its configured protocol and
/// registries
///
/// Services are added to the runtime's [`ProviderRouter`], so a shared
/// server created by any exporter keeps routing later exports.
pub struct ProviderExporter {
    runtime: Arc<LuixRuntime>,
    config: LuixConfig,
    exported: Mutex<HashMap<String, Exported>>,
}

impl ProviderExporter {
    /// Exporter for a validated configuration
    pub fn new(runtime: Arc<LuixRuntime>, config: LuixConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime,
            config,
            exported: Mutex::new(HashMap::new()),
        })
    }

    /// Router serving the exported services
    pub fn router(&self) -> &Arc<ProviderRouter> {
        self.runtime.router()
    }

    /// Configuration in use
    pub fn config(&self) -> &LuixConfig {
        &self.config
    }

    /// Provider URLs currently published
    pub fn exported_urls(&self) -> Vec<Url> {
        lock(&self.exported)
            .values()
            .map(|e| e.url.clone())
            .collect()
    }

    /// Serve a service and publish it to every registry
    ///
    /// Returns the published provider URL. When the protocol port is `0`
    /// the URL carries the port actually bound.
    pub async fn export(
        &self,
        service: ServiceHandler,
        form: Option<&str>,
        version: Option<&str>,
    ) -> Result<Url> {
        let path = service.interface_name().to_string();
        let mut bind_url = self.config.protocol.provider_url(
            &self.config.application.id,
            &path,
            &self.config.provider.health_checker,
        );
        if let Some(form) = form {
            bind_url.add_option(keys::FORM, form);
        }
        if let Some(version) = version {
            bind_url.add_option(keys::VERSION, version);
        }

        let factory = self.runtime.server_factory(&self.config.protocol.name)?;
        self.router().add_service(service)?;
        let handler: Arc<dyn MessageHandler> = self.router().clone();
        let server = match factory.create_server(&bind_url, handler) {
            Ok(server) => server,
            Err(e) => {
                self.router().remove_service(&path);
                return Err(e);
            }
        };

        match self.publish(&server, &bind_url).await {
            Ok(url) => {
                lock(&self.exported).insert(
                    url.identity(),
                    Exported {
                        bind_url: bind_url.clone(),
                        url: url.clone(),
                        server,
                    },
                );
                info!("Exported {}", url);
                Ok(url)
            }
            Err(e) => {
                factory.destroy_server(&bind_url, &server);
                self.router().remove_service(&path);
                Err(e)
            }
        }
    }

    async fn publish(&self, server: &Arc<dyn Server>, bind_url: &Url) -> Result<Url> {
        server.open().await?;
        let url = match (bind_url.port(), server.local_addr()) {
            (0, Some(local)) => bind_url.clone().with_port(local.port()),
            _ => bind_url.clone(),
        };

        let mut published: Vec<Arc<Registry>> = Vec::new();
        for config in &self.config.registries {
            let outcome = async {
                let registry = self.runtime.registries().get_registry(config)?;
                registry.register(&url).await?;
                published.push(registry.clone());
                registry.activate(Some(&url)).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = outcome {
                warn!("Failed to publish {} to {}: {}", url, config.name, e);
                Self::withdraw(&published, &url).await;
                return Err(e);
            }
        }
        Ok(url)
    }

    /// Best-effort removal from registries a failed export reached
    async fn withdraw(registries: &[Arc<Registry>], url: &Url) {
        for registry in registries {
            if let Err(e) = registry.deactivate(Some(url)).await {
                warn!("Failed to deactivate {} in {}: {}", url, registry.url(), e);
            }
            if let Err(e) = registry.deregister(url).await {
                warn!("Failed to deregister {} from {}: {}", url, registry.url(), e);
            }
        }
    }

    /// Withdraw a provider URL returned by [`export`](Self::export)
    ///
    /// Returns whether the underlying server was closed; a shared server
    /// stays open while other providers use it.
    pub async fn unexport(&self, url: &Url) -> Result<bool> {
        let exported = lock(&self.exported).remove(&url.identity()).ok_or_else(|| {
            Error::configuration(format!("{} is not exported by this process", url))
        })?;

        let mut first_error = None;
        for config in &self.config.registries {
            let outcome = async {
                let registry = self.runtime.registries().get_registry(config)?;
                registry.deactivate(Some(url)).await?;
                registry.deregister(url).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = outcome {
                warn!("Failed to withdraw {} from {}: {}", url, config.name, e);
                first_error.get_or_insert(e);
            }
        }

        self.router().remove_service(url.path());
        let factory = self.runtime.server_factory(&self.config.protocol.name)?;
        let closed = factory.destroy_server(&exported.bind_url, &exported.server);
        info!("Unexported {} (server closed: {})", url, closed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }

    /// Withdraw everything exported so far
    pub async fn unexport_all(&self) -> Result<()> {
        let mut first_error = None;
        for url in self.exported_urls() {
            if let Err(e) = self.unexport(&url).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
