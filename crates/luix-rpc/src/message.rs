//! Wire model exchanged between consumers and providers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique request id
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A method invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response with this request
    pub request_id: u64,
    /// Service interface, matched against provider paths
    pub interface_name: String,
    /// Method to call
    pub method_name: String,
    /// Parameter type signature, used to pick among overloads
    pub method_parameters: Vec<String>,
    /// Arguments in declaration order
    pub arguments: Vec<Value>,
    /// Cross-cutting options (form, version, timeout, trace id, ...)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Request {
    /// Create a request with a fresh id
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        method_parameters: Vec<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            request_id: next_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            method_parameters,
            arguments,
            options: BTreeMap::new(),
        }
    }

    /// Set an option and return the request
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Look up an option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Numeric option, `default` when absent or malformed
    pub fn option_u64(&self, key: &str, default: u64) -> u64 {
        self.option(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// `method(Type1,Type2)` form used for dispatch
    pub fn signature(&self) -> String {
        method_signature(&self.method_name, &self.method_parameters)
    }
}

/// Build the dispatch key of a method
pub fn method_signature(method: &str, parameters: &[String]) -> String {
    format!("{}({})", method, parameters.join(","))
}

/// Remote error kind of a request the provider could not decode
pub const DECODE_FAILED: &str = "DecodeFailed";

/// Business exception carried back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Exception kind, e.g. `IllegalArgument`
    pub kind: String,
    /// Human readable message
    pub message: String,
}

impl RemoteError {
    /// Create a remote error
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the answered request
    pub request_id: u64,
    /// Return value on success
    #[serde(default)]
    pub result: Option<Value>,
    /// Business exception on failure
    #[serde(default)]
    pub exception: Option<RemoteError>,
    /// Time the provider spent handling the request
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl Response {
    /// Successful response
    pub fn success(request_id: u64, result: Value) -> Self {
        Self {
            request_id,
            result: Some(result),
            exception: None,
            elapsed_ms: 0,
        }
    }

    /// Failed response
    pub fn failure(request_id: u64, exception: RemoteError) -> Self {
        Self {
            request_id,
            result: None,
            exception: Some(exception),
            elapsed_ms: 0,
        }
    }
}

/// Anything that travels in a frame
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Invocation from a consumer
    Request(Request),
    /// Answer from a provider
    Response(Response),
    /// Keep-alive ping (`response == false`) or its answer
    Heartbeat {
        /// Correlation id
        request_id: u64,
        /// Whether this is the answer
        response: bool,
    },
}

impl Message {
    /// Request id carried in the frame header
    pub fn request_id(&self) -> u64 {
        match self {
            Self::Request(request) => request.request_id,
            Self::Response(response) => response.request_id,
            Self::Heartbeat { request_id, .. } => *request_id,
        }
    }
}
