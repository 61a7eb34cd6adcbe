//! Error types for the sandbox.

use thiserror::Error;

/// Errors that can occur during sandbox execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Agent code exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// The execution result exceeds the configured maximum size.
    #[error("output exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// Execution timed out: either the CPU watchdog fired on a synchronous
    /// loop or the event loop exceeded the wall-clock budget.
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The V8 heap grew past the per-run memory cap.
    #[error("memory limit exceeded ({max_heap_bytes} byte heap cap)")]
    HeapLimitExceeded {
        /// Configured heap cap in bytes.
        max_heap_bytes: usize,
    },

    /// A JavaScript error: parse failure, or an uncaught throw from agent
    /// code. Carries the original message.
    #[error("{message}")]
    JsError {
        /// The error message from JavaScript.
        message: String,
    },

    /// An injected global or namespace member has a name that is not a
    /// valid JavaScript identifier.
    #[error("invalid global name \"{name}\": must be a valid JavaScript identifier")]
    InvalidGlobalName {
        /// The offending name.
        name: String,
    },

    /// Result (de)serialization failed on the host side.
    #[error("result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic execution failure (thread/runtime plumbing).
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}
