//! Consumer side transport

pub mod tcp;

use crate::error::Result;
use crate::future::ResponseFuture;
use crate::message::Request;
use async_trait::async_trait;
use luix_registry::Url;

/// Sends requests to providers
#[async_trait]
pub trait Requester: Send + Sync {
    /// Send a request to a provider; the returned future completes with
    /// the response
    async fn send(&self, provider: &Url, request: Request) -> Result<ResponseFuture>;

    /// Drop every connection, failing in-flight requests
    fn close(&self);
}
