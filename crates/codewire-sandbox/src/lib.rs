#![warn(missing_docs)]

//! # codewire-sandbox
//!
//! Single-shot V8 sandbox for agent-written JavaScript.
//!
//! Each execution gets a brand-new deno_core isolate, a set of injected
//! globals, and nothing else: no filesystem, no network, no module loader,
//! no environment. The only way out is through host functions the caller
//! injects, and every value crossing the boundary travels as JSON — the
//! sandbox never holds a reference into host memory, and the host never
//! holds a reference into the sandbox heap past the call.
//!
//! ## Security model
//!
//! - **V8 isolate**: the same process-level isolation as browser tabs
//! - **Fresh runtime per call**: no state leaks between executions
//! - **Heap cap**: per-run `heap_limits` plus a near-heap-limit callback
//! - **CPU cap**: a watchdog thread terminates runaway synchronous loops
//! - **Wall-clock cap**: the event-loop drive is bounded, so code blocked
//!   on host I/O cannot hang the executor
//! - **Silent console**: `console.log/warn/error` are no-ops so sandbox
//!   output cannot accumulate in host memory

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

pub mod error;
pub mod executor;
pub mod ops;

pub use error::SandboxError;
pub use executor::{SandboxConfig, SandboxExecutor};

/// A host capability callable from sandbox code.
///
/// Arguments arrive deep-copied out of the sandbox (one `Value` per JS
/// argument); the returned value is deep-copied back in. From inside the
/// sandbox the function is always asynchronous, whatever the
/// implementation does.
#[async_trait::async_trait]
pub trait HostFunction: Send + Sync {
    /// Invoke the capability.
    async fn invoke(&self, args: Vec<Value>) -> Result<Value, anyhow::Error>;
}

/// A value injected as a sandbox global.
pub enum Injected {
    /// Deep-copied inert data.
    Data(Value),
    /// A callable global returning a promise inside the sandbox.
    Function(Arc<dyn HostFunction>),
    /// A frozen object global mixing data members and async callables.
    Namespace(BTreeMap<String, NamespaceEntry>),
}

/// One member of an [`Injected::Namespace`] object.
pub enum NamespaceEntry {
    /// Deep-copied inert data.
    Data(Value),
    /// An async callable bound onto the namespace object.
    Function(Arc<dyn HostFunction>),
}
