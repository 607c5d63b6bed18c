//! Fault tolerance strategies decide how failed attempts are retried

use super::ClusterInvoker;
use crate::error::{Error, Result};
use crate::message::{Request, next_request_id};
use async_trait::async_trait;
use luix_registry::{Strategies, Url, url::keys};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Retry transient failures on other providers
pub const FAILOVER: &str = "failover";

/// Single attempt
pub const FAILFAST: &str = "failfast";

/// Drives the attempts of one call
#[async_trait]
pub trait FaultTolerance: Send + Sync {
    /// Strategy name
    fn name(&self) -> &'static str;

    /// Run the call against the cluster
    async fn invoke(&self, cluster: &ClusterInvoker, request: Request) -> Result<Value>;
}

/// Retries transient failures up to the request's `retryCount`, preferring
/// providers that have not failed yet
///
/// A provider that was never reachable is skipped without using up a retry;
/// its initialization error only surfaces when no other provider is left.
#[derive(Debug, Default)]
pub struct Failover;

#[async_trait]
impl FaultTolerance for Failover {
    fn name(&self) -> &'static str {
        FAILOVER
    }

    async fn invoke(&self, cluster: &ClusterInvoker, request: Request) -> Result<Value> {
        let attempts = request.option_u64(keys::RETRY_COUNT, 0).saturating_add(1);
        let mut failed: Vec<Url> = Vec::new();
        let mut attempt = 0;
        let mut sent = false;

        loop {
            let provider = cluster.select(&request, &failed)?;
            let mut call = request.clone();
            if sent {
                // Fresh id so a late answer to an abandoned attempt is dropped
                call.request_id = next_request_id();
            }
            sent = true;

            match cluster.call(&provider, call).await {
                Ok(value) => return Ok(value),
                Err(e @ Error::Initialization(_)) => {
                    warn!(
                        "Skipping unreachable provider {} of {}: {}",
                        provider.address(),
                        request.interface_name,
                        e
                    );
                    failed.push(provider);
                    if cluster.providers().iter().all(|p| failed.contains(p)) {
                        return Err(e);
                    }
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    warn!(
                        "Attempt {}/{} of {}.{} on {} failed: {}",
                        attempt,
                        attempts,
                        request.interface_name,
                        request.method_name,
                        provider.address(),
                        e
                    );
                    if attempt >= attempts {
                        return Err(e);
                    }
                    failed.push(provider);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Fails on the first error
#[derive(Debug, Default)]
pub struct Failfast;

#[async_trait]
impl FaultTolerance for Failfast {
    fn name(&self) -> &'static str {
        FAILFAST
    }

    async fn invoke(&self, cluster: &ClusterInvoker, request: Request) -> Result<Value> {
        let provider = cluster.select(&request, &[])?;
        cluster.call(&provider, request).await
    }
}

/// Built-in fault tolerance strategies
pub fn fault_tolerances() -> Strategies<Arc<dyn FaultTolerance>> {
    Strategies::new("fault tolerance")
        .with(FAILOVER, || Arc::new(Failover) as Arc<dyn FaultTolerance>)
        .with(FAILFAST, || Arc::new(Failfast) as Arc<dyn FaultTolerance>)
}
