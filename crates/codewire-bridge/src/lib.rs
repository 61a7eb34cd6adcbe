#![warn(missing_docs)]

//! # codewire-bridge
//!
//! The egress channel from sandbox code to the embedder's HTTP handler.
//!
//! Sandbox code calls a single `request` function; this crate is everything
//! behind it. A [`RequestBridge`] validates the method and path, filters
//! headers, serialises the body, composes the target URL, and enforces two
//! hard limits per bridge instance: a request count and a streamed
//! response-size cap. The orchestrator creates one bridge per execution, so
//! both limits are per-execution budgets.
//!
//! The embedder supplies the actual HTTP behaviour through [`HttpHandler`] —
//! a fetch-shaped trait. The bridge never opens sockets itself.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod bridge;
mod error;
mod headers;

pub use bridge::{BridgeOptions, RequestBridge};
pub use error::BridgeError;

/// Default cap on bridge invocations per execution.
pub const DEFAULT_MAX_REQUESTS: usize = 50;

/// Default cap on response body size in bytes (10 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// A stream of response body chunks from the embedder's handler.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, anyhow::Error>> + Send>>;

/// Fetch-shaped HTTP handler supplied by the embedder.
///
/// Receives the fully composed URL and a request init record; returns the
/// host response. Implementations hold credentials and routing — sandbox
/// code never sees either. Must be safe to call concurrently.
#[async_trait::async_trait]
pub trait HttpHandler: Send + Sync {
    /// Perform one HTTP request.
    async fn handle(&self, url: &str, init: RequestInit) -> Result<HostResponse, anyhow::Error>;
}

/// The request record handed to an [`HttpHandler`].
#[derive(Debug, Clone)]
pub struct RequestInit {
    /// Upper-case HTTP method.
    pub method: String,
    /// Headers surviving the bridge's filter, plus a defaulted
    /// `content-type` when a body is present.
    pub headers: Vec<(String, String)>,
    /// JSON-serialised request body, when one was given.
    pub body: Option<String>,
}

/// The response a handler returns to the bridge.
pub struct HostResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Response body, streamed or buffered.
    pub body: ResponseBody,
}

/// Response body shapes a handler may produce.
///
/// Handlers should prefer [`ResponseBody::Stream`] so the bridge can enforce
/// its size cap before the body is fully in host memory; [`ResponseBody::Text`]
/// is the fallback for handlers that only have a buffered body.
pub enum ResponseBody {
    /// Byte chunks as they arrive from the wire.
    Stream(ByteStream),
    /// A single buffered text body.
    Text(String),
}

impl HostResponse {
    /// A buffered text response with no headers.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Text(body.into()),
        }
    }

    /// A JSON response with a matching `content-type` header.
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: ResponseBody::Text(value.to_string()),
        }
    }

    /// A streamed response built from pre-chunked bytes.
    pub fn from_chunks(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Stream(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, anyhow::Error>),
            ))),
        }
    }
}

/// The request object sandbox code passes to `request(...)`.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxRequest {
    /// HTTP method, case-insensitive.
    pub method: String,
    /// Path relative to the bridge's base URL. Must start with a single `/`.
    pub path: String,
    /// Query parameters; values are stringified.
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    /// JSON body.
    #[serde(default)]
    pub body: Option<Value>,
    /// Request headers, subject to the bridge's filter.
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
}

/// The response object returned into the sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lower-cased.
    pub headers: Map<String, Value>,
    /// JSON-parsed body for `application/json` responses, raw text otherwise.
    pub body: Value,
}
