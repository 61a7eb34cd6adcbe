//! The bridge itself: per-call validation, URL composition, limit
//! enforcement, response adaptation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value};
use url::Url;

use crate::error::BridgeError;
use crate::headers::filter_headers;
use crate::{
    HostResponse, HttpHandler, RequestInit, ResponseBody, SandboxRequest, SandboxResponse,
    DEFAULT_MAX_REQUESTS, DEFAULT_MAX_RESPONSE_BYTES,
};

/// Methods the bridge will forward, post-normalisation.
const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Egress limits and header policy for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Cap on total invocations of this bridge instance.
    pub max_requests: usize,
    /// Cap on response body size in bytes, enforced while streaming.
    pub max_response_bytes: usize,
    /// When set, whitelist mode: only these header names survive.
    /// Otherwise blocklist mode.
    pub allowed_headers: Option<Vec<String>>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allowed_headers: None,
        }
    }
}

/// The egress channel for one execution.
///
/// Holds the request counter, so the orchestrator must construct a fresh
/// bridge per `execute` call to get the per-execution budget the contract
/// promises.
pub struct RequestBridge {
    handler: Arc<dyn HttpHandler>,
    base_url: String,
    options: BridgeOptions,
    requests_made: AtomicUsize,
}

impl RequestBridge {
    /// Create a bridge over the embedder's handler.
    pub fn new(
        handler: Arc<dyn HttpHandler>,
        base_url: impl Into<String>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            handler,
            base_url: base_url.into(),
            options,
            requests_made: AtomicUsize::new(0),
        }
    }

    /// Perform one bridged request on behalf of sandbox code.
    pub async fn request(&self, request: SandboxRequest) -> Result<SandboxResponse, BridgeError> {
        let made = self.requests_made.fetch_add(1, Ordering::SeqCst) + 1;
        if made > self.options.max_requests {
            return Err(BridgeError::RequestLimitExceeded {
                max: self.options.max_requests,
            });
        }

        let method = request.method.to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(BridgeError::InvalidMethod {
                method: request.method,
            });
        }

        validate_path(&request.path)?;

        let mut target = Url::parse(&format!("{}{}", self.base_url, request.path))?;
        if let Some(query) = &request.query {
            let mut pairs = target.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, &stringify(value));
            }
        }

        let empty = Map::new();
        let mut headers = filter_headers(
            request.headers.as_ref().unwrap_or(&empty),
            self.options.allowed_headers.as_deref(),
        );

        let body = match &request.body {
            Some(value) => {
                if !headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("content-type".to_string(), "application/json".to_string()));
                }
                Some(serde_json::to_string(value)?)
            }
            None => None,
        };

        tracing::debug!(
            method = %method,
            path = %request.path,
            request_number = made,
            "bridged request"
        );

        let init = RequestInit {
            method,
            headers,
            body,
        };
        let response = self
            .handler
            .handle(target.as_str(), init)
            .await
            .map_err(BridgeError::Handler)?;

        self.adapt_response(response).await
    }

    /// Read the body with the streamed size cap, then shape the response for
    /// the sandbox.
    async fn adapt_response(&self, response: HostResponse) -> Result<SandboxResponse, BridgeError> {
        let max = self.options.max_response_bytes;
        let bytes = match response.body {
            ResponseBody::Stream(mut stream) => {
                let mut buf: Vec<u8> = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(BridgeError::Body)?;
                    if buf.len() + chunk.len() > max {
                        return Err(BridgeError::ResponseTooLarge { max });
                    }
                    buf.extend_from_slice(&chunk);
                }
                buf
            }
            ResponseBody::Text(text) => {
                if text.len() > max {
                    return Err(BridgeError::ResponseTooLarge { max });
                }
                text.into_bytes()
            }
        };

        // Decode exactly once, after the cap has been enforced.
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let mut headers = Map::new();
        for (name, value) in response.headers {
            headers.insert(name.to_ascii_lowercase(), Value::String(value));
        }

        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let body = if is_json {
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => parsed,
                Err(_) => Value::String(text),
            }
        } else {
            Value::String(text)
        };

        Ok(SandboxResponse {
            status: response.status,
            headers,
            body,
        })
    }
}

/// SSRF/smuggling checks on the sandbox-supplied path. Ordering matters:
/// an absolute URL must be reported as the `://` violation, not as a
/// missing leading slash.
fn validate_path(path: &str) -> Result<(), BridgeError> {
    let fail = |reason: &str| {
        Err(BridgeError::InvalidPath {
            reason: reason.to_string(),
        })
    };
    if path.contains("://") {
        return fail("must not contain \"://\"");
    }
    if path.starts_with("//") {
        return fail("must not start with \"//\"");
    }
    if !path.starts_with('/') {
        return fail("must start with \"/\"");
    }
    if path.contains('\0') {
        return fail("must not contain null bytes");
    }
    if path.contains('\r') || path.contains('\n') {
        return fail("must not contain CR or LF characters");
    }
    if path.contains('\\') {
        return fail("must not contain backslashes");
    }
    Ok(())
}

/// Render a JSON value as a query/header string: strings pass through,
/// everything else keeps its JSON rendering.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
