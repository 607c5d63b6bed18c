//! Provider side: request handling, servers and shared channels

pub mod health;
pub mod router;
pub mod shared;
pub mod tcp;

use crate::error::Result;
use crate::message::{Request, Response};
use async_trait::async_trait;
use luix_registry::Url;
use std::net::SocketAddr;

/// Turns a request into a response
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one request; failures are reported inside the response
    async fn handle(&self, request: Request) -> Response;
}

/// A listening endpoint
#[async_trait]
pub trait Server: Send + Sync {
    /// URL the server was created for (empty path when shared)
    fn url(&self) -> &Url;

    /// Bind and start accepting; a no-op when already bound
    async fn open(&self) -> Result<()>;

    /// Stop accepting and drop every connection
    fn close(&self);

    /// Whether [`close`](Self::close) was called
    fn is_closed(&self) -> bool;

    /// Whether the server is currently listening
    fn is_bound(&self) -> bool;

    /// Bound socket address, once open
    fn local_addr(&self) -> Option<SocketAddr>;
}
