//! Health check decoration of message handlers

use super::MessageHandler;
use crate::message::{Request, Response};
use async_trait::async_trait;
use luix_registry::Strategies;
use serde_json::Value;
use std::sync::Arc;

/// Health checker answering [`HEALTH_METHOD`]
pub const DEFAULT: &str = "default";

/// Health checker that leaves handlers untouched
pub const NONE: &str = "none";

/// Reserved method answered by the default health checker on any path
pub const HEALTH_METHOD: &str = "$health";

/// Wraps a handler with health check behaviour
pub trait HealthChecker: Send + Sync {
    /// Return the decorated handler
    fn decorate(&self, handler: Arc<dyn MessageHandler>) -> Arc<dyn MessageHandler>;
}

/// Answers `$health` with `"ok"` and forwards everything else
pub struct DefaultHealthChecker;

impl HealthChecker for DefaultHealthChecker {
    fn decorate(&self, handler: Arc<dyn MessageHandler>) -> Arc<dyn MessageHandler> {
        Arc::new(HealthCheckHandler { inner: handler })
    }
}

/// Disables health checks
pub struct NoHealthChecker;

impl HealthChecker for NoHealthChecker {
    fn decorate(&self, handler: Arc<dyn MessageHandler>) -> Arc<dyn MessageHandler> {
        handler
    }
}

struct HealthCheckHandler {
    inner: Arc<dyn MessageHandler>,
}

#[async_trait]
impl MessageHandler for HealthCheckHandler {
    async fn handle(&self, request: Request) -> Response {
        if request.method_name == HEALTH_METHOD {
            return Response::success(request.request_id, Value::from("ok"));
        }
        self.inner.handle(request).await
    }
}

/// Built-in health checkers
pub fn health_checkers() -> Strategies<Arc<dyn HealthChecker>> {
    Strategies::new("health checker")
        .with(DEFAULT, || Arc::new(DefaultHealthChecker) as Arc<dyn HealthChecker>)
        .with(NONE, || Arc::new(NoHealthChecker) as Arc<dyn HealthChecker>)
}
