//! Per-path routing of requests to service implementations

use super::MessageHandler;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::message::{RemoteError, Request, Response, method_signature};
use async_trait::async_trait;
use futures::future::BoxFuture;
use luix_registry::sync::{read, write};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

/// Remote error kind for an unknown interface
pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";

/// Remote error kind for an unknown method signature
pub const METHOD_NOT_FOUND: &str = "MethodNotFound";

type Method = Arc<
    dyn Fn(Vec<Value>, RequestContext) -> BoxFuture<'static, std::result::Result<Value, RemoteError>>
        + Send
        + Sync,
>;

/// Dispatch table of one service interface
pub struct ServiceHandler {
    interface_name: String,
    methods: HashMap<String, Method>,
}

impl ServiceHandler {
    /// Empty table for an interface
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method implementation under its name and parameter signature
    pub fn method<F, Fut>(mut self, name: &str, parameters: &[&str], implementation: F) -> Self
    where
        F: Fn(Vec<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RemoteError>> + Send + 'static,
    {
        let parameters: Vec<String> = parameters.iter().map(|p| p.to_string()).collect();
        let method: Method = Arc::new(
            move |args: Vec<Value>,
                  context: RequestContext|
                  -> BoxFuture<'static, std::result::Result<Value, RemoteError>> {
                Box::pin(implementation(args, context))
            },
        );
        self.methods
            .insert(method_signature(name, &parameters), method);
        self
    }

    /// Interface this table serves
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Registered method signatures, sorted
    pub fn signatures(&self) -> Vec<String> {
        let mut signatures: Vec<String> = self.methods.keys().cloned().collect();
        signatures.sort();
        signatures
    }

    /// Invoke the method named by a request
    pub async fn dispatch(&self, request: Request) -> Response {
        let started = Instant::now();
        let request_id = request.request_id;
        let signature = request.signature();

        let Some(method) = self.methods.get(&signature).cloned() else {
            return Response::failure(
                request_id,
                RemoteError::new(
                    METHOD_NOT_FOUND,
                    format!("{} has no method {}", self.interface_name, signature),
                ),
            );
        };

        let context = RequestContext::from_request(&request);
        let mut response = match method(request.arguments, context).await {
            Ok(value) => Response::success(request_id, value),
            Err(exception) => Response::failure(request_id, exception),
        };
        response.elapsed_ms = started.elapsed().as_millis() as u64;
        response
    }
}

/// Routes requests by interface name to registered services
#[derive(Default)]
pub struct ProviderRouter {
    services: RwLock<HashMap<String, Arc<ServiceHandler>>>,
}

impl ProviderRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service; each interface may only be added once
    pub fn add_service(&self, service: ServiceHandler) -> Result<()> {
        let mut services = write(&self.services);
        if services.contains_key(service.interface_name()) {
            return Err(Error::configuration(format!(
                "Service {} is already exported",
                service.interface_name()
            )));
        }
        debug!(
            "Routing {} ({} methods)",
            service.interface_name(),
            service.methods.len()
        );
        services.insert(service.interface_name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Remove a service, returning whether it was present
    pub fn remove_service(&self, interface_name: &str) -> bool {
        write(&self.services).remove(interface_name).is_some()
    }

    /// Routed interface names, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.services).keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageHandler for ProviderRouter {
    async fn handle(&self, request: Request) -> Response {
        let service = read(&self.services).get(&request.interface_name).cloned();
        match service {
            Some(service) => service.dispatch(request).await,
            None => Response::failure(
                request.request_id,
                RemoteError::new(
                    SERVICE_NOT_FOUND,
                    format!("No provider for {}", request.interface_name),
                ),
            ),
        }
    }
}
