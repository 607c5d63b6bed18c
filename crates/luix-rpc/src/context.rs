//! Per-call context passed explicitly through the call chain

use crate::message::Request;
use std::collections::BTreeMap;

/// Request option carrying the trace id
pub const TRACE_ID: &str = "traceId";

/// Trace id and free-form attachments for one logical call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    trace_id: String,
    attachments: BTreeMap<String, String>,
}

impl RequestContext {
    /// Context with a fresh trace id
    pub fn new() -> Self {
        Self::with_trace_id(uuid::Uuid::new_v4().to_string())
    }

    /// Context continuing an existing trace
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            attachments: BTreeMap::new(),
        }
    }

    /// Rebuild the context a consumer attached to an inbound request
    pub fn from_request(request: &Request) -> Self {
        let mut context = match request.option(TRACE_ID) {
            Some(trace_id) => Self::with_trace_id(trace_id),
            None => Self::new(),
        };
        context.attachments = request
            .options
            .iter()
            .filter(|(key, _)| key.as_str() != TRACE_ID)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        context
    }

    /// Trace id
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Add an attachment
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    /// Look up an attachment
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Copy the context into request options without overriding options
    /// already set on the request
    pub fn apply(&self, request: &mut Request) {
        request
            .options
            .insert(TRACE_ID.to_string(), self.trace_id.clone());
        for (key, value) in &self.attachments {
            request
                .options
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
