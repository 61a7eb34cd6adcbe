//! Error types for the request bridge.

use thiserror::Error;

/// Errors surfaced by [`RequestBridge::request`](crate::RequestBridge::request).
///
/// Every variant's message is agent-facing: it propagates into the sandbox
/// as the thrown error text, so the wording is part of the contract.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The per-execution request budget is spent.
    #[error("Request limit exceeded: max {max} requests per execution")]
    RequestLimitExceeded {
        /// Configured request cap.
        max: usize,
    },

    /// The method is not in the allowed set (after upper-casing).
    #[error("Invalid HTTP method: \"{method}\". Allowed: GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS")]
    InvalidMethod {
        /// The method as the caller supplied it.
        method: String,
    },

    /// The path failed an SSRF/smuggling check.
    #[error("Invalid path: {reason}")]
    InvalidPath {
        /// Which rule the path broke.
        reason: String,
    },

    /// The response body exceeded the streamed size cap.
    #[error("Response too large: exceeded limit of {max} bytes")]
    ResponseTooLarge {
        /// Configured byte cap.
        max: usize,
    },

    /// Base URL plus path did not compose into a valid URL.
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    /// The request body could not be JSON-encoded.
    #[error("request body serialization failed: {0}")]
    BodySerialization(#[from] serde_json::Error),

    /// The embedder's handler failed.
    #[error("request failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// Reading the response body stream failed.
    #[error("failed to read response body: {0}")]
    Body(#[source] anyhow::Error),
}
