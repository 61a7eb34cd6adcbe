#![warn(missing_docs)]

//! # codewire-gateway
//!
//! The orchestrator of the codewire gateway.
//!
//! Exposes an entire HTTP API to an agent through exactly two tools:
//! - `search` — run discovery code against the processed OpenAPI document
//! - `execute` — run code that calls the API through the request bridge
//!
//! The gateway owns the lifecycle: it lazily processes the OpenAPI document
//! and lazily builds the executor (concurrent first calls share one build),
//! constructs a fresh request bridge per `execute` call so the request
//! counter is a per-execution budget, and formats every outcome as a tool
//! result — a sandbox failure never propagates as an error to the embedder.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

use codewire_bridge::{BridgeOptions, HttpHandler, RequestBridge, SandboxRequest};
use codewire_openapi::{extract_tags, process_spec, DEFAULT_MAX_REF_DEPTH};
use codewire_sandbox::{
    HostFunction, Injected, NamespaceEntry, SandboxConfig, SandboxExecutor,
};

pub mod metrics;
pub mod tools;

pub use crate::tools::ToolDescriptor;

use crate::metrics::{ErrorKind, GatewayMetrics, Operation};

/// Default namespace for the `request` binding.
pub const DEFAULT_NAMESPACE: &str = "api";

/// Default base URL prepended to bridged request paths.
pub const DEFAULT_BASE_URL: &str = "http://localhost";

/// Default response budget in estimated tokens (~4 chars each).
pub const DEFAULT_MAX_RESPONSE_TOKENS: usize = 25_000;

/// Identifiers the namespace must not shadow: well-known built-ins the
/// agent might rely on, the `spec` binding owned by `search`, and the
/// ambient `console`/`global` names.
const RESERVED_NAMES: [&str; 27] = [
    "Object", "Array", "Promise", "Function", "String", "Number", "Boolean", "Symbol", "Map",
    "Set", "WeakMap", "WeakSet", "Date", "RegExp", "Error", "JSON", "Math", "Proxy", "Reflect",
    "globalThis", "undefined", "null", "NaN", "Infinity", "console", "spec", "global",
];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static identifier pattern"));

/// Errors surfaced to the embedder at construction or spec-load time.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configured namespace is not a JavaScript identifier.
    #[error("Invalid namespace \"{namespace}\": must be a valid JavaScript identifier")]
    NamespaceNotIdentifier {
        /// The rejected namespace.
        namespace: String,
    },

    /// The configured namespace would shadow a built-in or gateway binding.
    #[error("Invalid namespace \"{namespace}\": conflicts with reserved name")]
    NamespaceReserved {
        /// The rejected namespace.
        namespace: String,
    },

    /// The spec loader failed.
    #[error("failed to load OpenAPI document: {0}")]
    SpecLoad(#[source] anyhow::Error),
}

/// Async producer of an OpenAPI document, for embedders that fetch it.
#[async_trait::async_trait]
pub trait SpecLoader: Send + Sync {
    /// Produce the document.
    async fn load(&self) -> Result<Value, anyhow::Error>;
}

/// Where the OpenAPI document comes from.
pub enum SpecSource {
    /// A document value held by the embedder.
    Document(Value),
    /// An async producer, invoked once on first `search`.
    Loader(Arc<dyn SpecLoader>),
}

impl From<Value> for SpecSource {
    fn from(value: Value) -> Self {
        Self::Document(value)
    }
}

/// Gateway configuration. `new` fills the documented defaults; the `with_*`
/// builders override the optional knobs.
pub struct GatewayConfig {
    /// The OpenAPI document or its producer.
    pub spec: SpecSource,
    /// The embedder's HTTP handler.
    pub handler: Arc<dyn HttpHandler>,
    /// Identifier under which `request` is exposed to execute code.
    pub namespace: String,
    /// Base URL prepended to bridged request paths.
    pub base_url: String,
    /// Sandbox resource bounds.
    pub sandbox: SandboxConfig,
    /// Pre-built executor, for embedders that share one across gateways.
    pub executor: Option<Arc<SandboxExecutor>>,
    /// Response budget in estimated tokens.
    pub max_response_tokens: usize,
    /// Per-execution request cap for the bridge.
    pub max_requests: usize,
    /// Streamed response-size cap for the bridge.
    pub max_response_bytes: usize,
    /// Optional header whitelist for the bridge.
    pub allowed_headers: Option<Vec<String>>,
    /// Reference-resolution depth bound.
    pub max_ref_depth: usize,
}

impl GatewayConfig {
    /// Configuration with the documented defaults.
    pub fn new(spec: impl Into<SpecSource>, handler: Arc<dyn HttpHandler>) -> Self {
        Self {
            spec: spec.into(),
            handler,
            namespace: DEFAULT_NAMESPACE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            sandbox: SandboxConfig::default(),
            executor: None,
            max_response_tokens: DEFAULT_MAX_RESPONSE_TOKENS,
            max_requests: codewire_bridge::DEFAULT_MAX_REQUESTS,
            max_response_bytes: codewire_bridge::DEFAULT_MAX_RESPONSE_BYTES,
            allowed_headers: None,
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
        }
    }

    /// Override the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the sandbox bounds.
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Override the per-execution request cap.
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Override the response-size cap.
    pub fn with_max_response_bytes(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }

    /// Switch the bridge to header-whitelist mode.
    pub fn with_allowed_headers(mut self, allowed: Vec<String>) -> Self {
        self.allowed_headers = Some(allowed);
        self
    }

    /// Override the response token budget.
    pub fn with_max_response_tokens(mut self, max_response_tokens: usize) -> Self {
        self.max_response_tokens = max_response_tokens;
        self
    }

    /// Override the reference-resolution depth bound.
    pub fn with_max_ref_depth(mut self, max_ref_depth: usize) -> Self {
        self.max_ref_depth = max_ref_depth;
        self
    }

    /// Supply a pre-built executor.
    pub fn with_executor(mut self, executor: Arc<SandboxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

/// Summary of the processed document used to enrich the search tool prose.
#[derive(Debug, Clone)]
pub struct SpecContext {
    /// Operation tags, most frequent first.
    pub tags: Vec<String>,
    /// Number of path/method operations.
    pub endpoint_count: usize,
}

struct ProcessedSpec {
    document: Value,
    context: SpecContext,
}

/// A block of tool-result content.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    /// Always `"text"`.
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text payload.
    pub text: String,
}

/// What a tool call returns to the embedder's protocol layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Result content blocks.
    pub content: Vec<ContentBlock>,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolResult {
    fn success(text: String) -> Self {
        Self {
            content: vec![ContentBlock {
                content_type: "text".to_string(),
                text,
            }],
            is_error: false,
        }
    }

    fn error(text: String) -> Self {
        Self {
            content: vec![ContentBlock {
                content_type: "text".to_string(),
                text,
            }],
            is_error: true,
        }
    }

    /// The first content block's text.
    pub fn text(&self) -> &str {
        self.content.first().map(|b| b.text.as_str()).unwrap_or("")
    }
}

/// The orchestrator. One instance serves any number of `search`/`execute`
/// calls; [`Gateway::dispose`] releases the cached executor.
pub struct Gateway {
    spec: SpecSource,
    handler: Arc<dyn HttpHandler>,
    namespace: String,
    base_url: String,
    sandbox: SandboxConfig,
    injected_executor: Option<Arc<SandboxExecutor>>,
    max_response_tokens: usize,
    max_requests: usize,
    max_response_bytes: usize,
    allowed_headers: Option<Vec<String>>,
    max_ref_depth: usize,
    search_name: String,
    execute_name: String,
    processed: OnceCell<Arc<ProcessedSpec>>,
    executor: OnceCell<Arc<SandboxExecutor>>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("namespace", &self.namespace)
            .field("base_url", &self.base_url)
            .field("sandbox", &self.sandbox)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("max_requests", &self.max_requests)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("allowed_headers", &self.allowed_headers)
            .field("max_ref_depth", &self.max_ref_depth)
            .field("search_name", &self.search_name)
            .field("execute_name", &self.execute_name)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway. Fails synchronously when the namespace is not a
    /// valid identifier or shadows a reserved name.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        validate_namespace(&config.namespace)?;
        Ok(Self {
            spec: config.spec,
            handler: config.handler,
            namespace: config.namespace,
            base_url: config.base_url,
            sandbox: config.sandbox,
            injected_executor: config.executor,
            max_response_tokens: config.max_response_tokens,
            max_requests: config.max_requests,
            max_response_bytes: config.max_response_bytes,
            allowed_headers: config.allowed_headers,
            max_ref_depth: config.max_ref_depth,
            search_name: "search".to_string(),
            execute_name: "execute".to_string(),
            processed: OnceCell::new(),
            executor: OnceCell::new(),
            metrics: None,
        })
    }

    /// Attach prometheus metrics, recorded around every search/execute.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rename the two tools.
    pub fn set_tool_names(
        &mut self,
        search_name: impl Into<String>,
        execute_name: impl Into<String>,
    ) {
        self.search_name = search_name.into();
        self.execute_name = execute_name.into();
    }

    /// The two tool descriptors. The search description carries the spec
    /// summary once the first `search` has processed the document.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let context = self.processed.get().map(|p| &p.context);
        vec![
            tools::search_descriptor(&self.search_name, context),
            tools::execute_descriptor(&self.execute_name, &self.namespace),
        ]
    }

    /// Route a tool call by name. Unknown names yield an error result, not
    /// an error return.
    pub async fn call_tool(&self, name: &str, code: &str) -> ToolResult {
        if name == self.search_name {
            self.search(code).await
        } else if name == self.execute_name {
            self.execute(code).await
        } else {
            ToolResult::error(format!(
                "Unknown tool: \"{name}\". Available tools: {}, {}",
                self.search_name, self.execute_name
            ))
        }
    }

    /// Run discovery code against the processed document.
    pub async fn search(&self, code: &str) -> ToolResult {
        tracing::info!(code_len = code.len(), "search: starting");
        let processed = match self.processed_spec().await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(error = %e, "search: spec processing failed");
                return ToolResult::error(format!("Error: {e}"));
            }
        };

        let mut globals = BTreeMap::new();
        globals.insert(
            "spec".to_string(),
            Injected::Data(processed.document.clone()),
        );
        self.run(Operation::Search, code, globals).await
    }

    /// Run code against the API through a fresh request bridge.
    pub async fn execute(&self, code: &str) -> ToolResult {
        tracing::info!(code_len = code.len(), "execute: starting");

        // A fresh bridge per call: the request counter is a per-execution
        // budget, not a gateway-lifetime one.
        let bridge = Arc::new(RequestBridge::new(
            self.handler.clone(),
            self.base_url.clone(),
            BridgeOptions {
                max_requests: self.max_requests,
                max_response_bytes: self.max_response_bytes,
                allowed_headers: self.allowed_headers.clone(),
            },
        ));

        let mut members = BTreeMap::new();
        members.insert(
            "request".to_string(),
            NamespaceEntry::Function(Arc::new(BridgeFunction { bridge }) as Arc<dyn HostFunction>),
        );
        let mut globals = BTreeMap::new();
        globals.insert(self.namespace.clone(), Injected::Namespace(members));
        self.run(Operation::Execute, code, globals).await
    }

    /// Release the cached executor and processed document.
    pub fn dispose(&mut self) {
        self.executor.take();
        self.processed.take();
        tracing::debug!("gateway disposed");
    }

    async fn run(
        &self,
        operation: Operation,
        code: &str,
        globals: BTreeMap<String, Injected>,
    ) -> ToolResult {
        let executor = self.executor().await;
        let started = Instant::now();
        match executor.execute(code, globals).await {
            Ok(value) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_success(operation, started.elapsed());
                }
                let text = self.render(value);
                tracing::info!(
                    operation = operation.as_str(),
                    result_len = text.len(),
                    "tool call complete"
                );
                ToolResult::success(text)
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_failure(operation, ErrorKind::of(&e));
                }
                tracing::warn!(operation = operation.as_str(), error = %e, "tool call failed");
                ToolResult::error(format!("Error: {e}"))
            }
        }
    }

    async fn executor(&self) -> Arc<SandboxExecutor> {
        self.executor
            .get_or_init(|| async {
                match &self.injected_executor {
                    Some(executor) => executor.clone(),
                    None => Arc::new(SandboxExecutor::new(self.sandbox.clone())),
                }
            })
            .await
            .clone()
    }

    async fn processed_spec(&self) -> Result<Arc<ProcessedSpec>, GatewayError> {
        self.processed
            .get_or_try_init(|| async {
                let doc = match &self.spec {
                    SpecSource::Document(value) => value.clone(),
                    SpecSource::Loader(loader) => {
                        loader.load().await.map_err(GatewayError::SpecLoad)?
                    }
                };
                let document = process_spec(&doc, self.max_ref_depth);
                let context = SpecContext {
                    tags: extract_tags(&doc),
                    endpoint_count: count_endpoints(&document),
                };
                tracing::info!(
                    endpoints = context.endpoint_count,
                    tags = context.tags.len(),
                    "OpenAPI document processed"
                );
                Ok(Arc::new(ProcessedSpec { document, context }))
            })
            .await
            .map(Arc::clone)
    }

    /// Stringify a sandbox result and apply the token budget.
    fn render(&self, value: Value) -> String {
        let text = match value {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        truncate_response(text, self.max_response_tokens)
    }
}

/// Adapter exposing a [`RequestBridge`] as the sandbox `request` callable.
struct BridgeFunction {
    bridge: Arc<RequestBridge>,
}

#[async_trait::async_trait]
impl HostFunction for BridgeFunction {
    async fn invoke(&self, mut args: Vec<Value>) -> Result<Value, anyhow::Error> {
        if args.is_empty() {
            anyhow::bail!("request() expects a {{ method, path, query?, body?, headers? }} argument");
        }
        let request: SandboxRequest = serde_json::from_value(args.swap_remove(0))
            .map_err(|e| anyhow::anyhow!("invalid request object: {e}"))?;
        let response = self.bridge.request(request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

fn validate_namespace(namespace: &str) -> Result<(), GatewayError> {
    if !IDENTIFIER.is_match(namespace) {
        return Err(GatewayError::NamespaceNotIdentifier {
            namespace: namespace.to_string(),
        });
    }
    if RESERVED_NAMES.contains(&namespace) {
        return Err(GatewayError::NamespaceReserved {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

/// Number of path/method operations in a processed document.
fn count_endpoints(processed: &Value) -> usize {
    processed
        .get("paths")
        .and_then(Value::as_object)
        .map(|paths| {
            paths
                .values()
                .filter_map(Value::as_object)
                .map(|entry| entry.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Cap `text` at `max_tokens × 4` characters, appending a note when cut.
fn truncate_response(text: String, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(4);
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text;
    }
    let estimated_tokens = char_count / 4;
    let truncated: String = text.chars().take(max_chars).collect();
    format!(
        "{truncated}\n\n---\n[Response truncated: ~{estimated_tokens} estimated tokens, limit is {max_tokens}]"
    )
}
