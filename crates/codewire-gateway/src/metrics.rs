//! Prometheus instruments for the gateway.
//!
//! The embedder owns the [`Registry`]; the gateway records into these
//! families when they are attached via
//! [`Gateway::with_metrics`](crate::Gateway::with_metrics). Labels are typed
//! enums rather than free-form strings, so dashboards can rely on the exact
//! set of series the gateway emits: two operations, and one failure series
//! per operation and error kind.

use std::time::Duration;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use codewire_sandbox::SandboxError;

/// Smallest duration bucket edge, in seconds.
const FASTEST_CALL_SECS: f64 = 0.001;

/// Edge-to-edge growth factor for the duration buckets.
const BUCKET_GROWTH: f64 = 4.0;

/// Upper bound on the bucket count, whatever the timeout.
const MAX_BUCKETS: usize = 12;

/// Which tool a sample belongs to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Operation {
    /// Discovery code run against the processed document.
    Search,
    /// Code run against the API through the bridge.
    Execute,
}

impl Operation {
    /// Lower-case name, for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Execute => "execute",
        }
    }
}

/// Why a call failed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Timeout,
    HeapLimit,
    JsError,
    CodeTooLarge,
    OutputTooLarge,
    InvalidGlobal,
    Serialization,
    Execution,
}

impl ErrorKind {
    /// Classify a sandbox failure.
    pub fn of(error: &SandboxError) -> Self {
        match error {
            SandboxError::Timeout { .. } => Self::Timeout,
            SandboxError::HeapLimitExceeded { .. } => Self::HeapLimit,
            SandboxError::JsError { .. } => Self::JsError,
            SandboxError::CodeTooLarge { .. } => Self::CodeTooLarge,
            SandboxError::OutputTooLarge { .. } => Self::OutputTooLarge,
            SandboxError::InvalidGlobalName { .. } => Self::InvalidGlobal,
            SandboxError::Serialization(_) => Self::Serialization,
            SandboxError::Execution(_) => Self::Execution,
        }
    }
}

/// Labels for the per-operation series.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CallLabels {
    /// The tool the call went through.
    pub operation: Operation,
}

/// Labels for the failure series.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    /// The tool the call went through.
    pub operation: Operation,
    /// The failure classification.
    pub kind: ErrorKind,
}

/// Builds histograms with a fixed, pre-computed set of bucket edges.
#[derive(Clone)]
pub struct HistogramBuckets(std::sync::Arc<Vec<f64>>);

impl MetricConstructor<Histogram> for HistogramBuckets {
    fn new_metric(&self) -> Histogram {
        Histogram::new(self.0.iter().copied())
    }
}

/// The gateway's prometheus instruments.
pub struct GatewayMetrics {
    /// Completed tool calls per operation.
    pub calls: Family<CallLabels, Counter>,
    /// Wall time of completed tool calls.
    pub call_duration_seconds: Family<CallLabels, Histogram, HistogramBuckets>,
    /// Failed tool calls by operation and error kind.
    pub failures: Family<FailureLabels, Counter>,
}

impl GatewayMetrics {
    /// Create the instruments and register them with `registry`.
    ///
    /// `slowest_call` should be the sandbox timeout; the duration buckets
    /// are derived from it so the histogram always resolves the range a
    /// call can actually take.
    pub fn register(registry: &mut Registry, slowest_call: Duration) -> Self {
        let calls = Family::default();
        registry.register("codewire_calls", "Completed tool calls", calls.clone());

        let buckets = duration_buckets(slowest_call);
        let call_duration_seconds =
            Family::<CallLabels, Histogram, HistogramBuckets>::new_with_constructor(
                HistogramBuckets(std::sync::Arc::new(buckets)),
            );
        registry.register(
            "codewire_call_duration_seconds",
            "Wall time of completed tool calls",
            call_duration_seconds.clone(),
        );

        let failures = Family::default();
        registry.register(
            "codewire_call_failures",
            "Failed tool calls by error kind",
            failures.clone(),
        );

        Self {
            calls,
            call_duration_seconds,
            failures,
        }
    }

    /// Record a completed call.
    pub fn observe_success(&self, operation: Operation, elapsed: Duration) {
        let labels = CallLabels { operation };
        self.calls.get_or_create(&labels).inc();
        self.call_duration_seconds
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
    }

    /// Record a failed call.
    pub fn observe_failure(&self, operation: Operation, kind: ErrorKind) {
        self.failures
            .get_or_create(&FailureLabels { operation, kind })
            .inc();
    }
}

/// Geometric bucket edges from [`FASTEST_CALL_SECS`] up to and including
/// the call ceiling.
fn duration_buckets(slowest_call: Duration) -> Vec<f64> {
    let ceiling = slowest_call.as_secs_f64().max(FASTEST_CALL_SECS);
    let mut edges = Vec::new();
    let mut edge = FASTEST_CALL_SECS;
    while edge < ceiling && edges.len() < MAX_BUCKETS - 1 {
        edges.push(edge);
        edge *= BUCKET_GROWTH;
    }
    edges.push(ceiling);
    edges
}
