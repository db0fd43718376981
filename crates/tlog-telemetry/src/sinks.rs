//! Abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns the configured storage metrics sink, or a no-op sink if uninitialized.
pub fn storage_metrics() -> &'static dyn StorageMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured pipeline metrics sink, or a no-op sink if uninitialized.
pub fn pipeline_metrics() -> &'static dyn PipelineMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured gateway metrics sink, or a no-op sink if uninitialized.
pub fn gateway_metrics() -> &'static dyn GatewayMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured persist/GC metrics sink, or a no-op sink if uninitialized.
pub fn maintenance_metrics() -> &'static dyn MaintenanceMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured error metrics sink, or a no-op sink if uninitialized.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// A sink for metrics related to a log's relational state store (component 4.A).
pub trait StorageMetricsSink: Send + Sync + std::fmt::Debug {
    /// Observes the latency of a state store round-trip, labeled by operation.
    fn observe_query_duration(&self, op: &str, duration_secs: f64);
    /// Increments a counter for state store operations, labeled by operation and outcome.
    fn inc_queries_total(&self, op: &str, outcome: &'static str);
    /// Sets the gauge for the number of connections currently checked out of the pool.
    fn set_pool_in_use(&self, count: u64);
}
impl StorageMetricsSink for NopSink {
    fn observe_query_duration(&self, _op: &str, _duration_secs: f64) {}
    fn inc_queries_total(&self, _op: &str, _outcome: &'static str) {}
    fn set_pool_in_use(&self, _count: u64) {}
}

/// A sink for metrics related to the append pipeline and Merkle integration
/// (components 4.F, 4.G, 4.H).
pub trait PipelineMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the total number of entries successfully appended, labeled by log.
    fn inc_entries_appended(&self, log_id: &str, count: u64);
    /// Observes the duration of a single flush (batch integration), labeled by log.
    fn observe_flush_duration(&self, log_id: &str, duration_secs: f64);
    /// Sets the gauge for the current tree size of a log.
    fn set_tree_size(&self, log_id: &str, size: u64);
    /// Increments a counter for checkpoint publications, labeled by log.
    fn inc_checkpoints_published(&self, log_id: &str);
    /// Sets the gauge for the current depth of the pending-entry batch queue.
    fn set_queue_depth(&self, log_id: &str, depth: u64);
}
impl PipelineMetricsSink for NopSink {
    fn inc_entries_appended(&self, _log_id: &str, _count: u64) {}
    fn observe_flush_duration(&self, _log_id: &str, _duration_secs: f64) {}
    fn set_tree_size(&self, _log_id: &str, _size: u64) {}
    fn inc_checkpoints_published(&self, _log_id: &str) {}
    fn set_queue_depth(&self, _log_id: &str, _depth: u64) {}
}

/// A sink for metrics related to the HTTP/RPC gateway (component 4.N).
pub trait GatewayMetricsSink: Send + Sync + std::fmt::Debug {
    /// Observes the latency of a request, labeled by route.
    fn observe_request_duration(&self, route: &str, duration_secs: f64);
    /// Increments a counter for requests, labeled by route and status code.
    fn inc_requests_total(&self, route: &str, status_code: u16);
    /// Increments a counter for requests rejected by the per-IP rate limiter.
    fn inc_rate_limited(&self, route: &str);
}
impl GatewayMetricsSink for NopSink {
    fn observe_request_duration(&self, _route: &str, _duration_secs: f64) {}
    fn inc_requests_total(&self, _route: &str, _status_code: u16) {}
    fn inc_rate_limited(&self, _route: &str) {}
}

/// A sink for metrics related to background maintenance: the index-CAR
/// persister (4.I) and the garbage collector (4.J).
pub trait MaintenanceMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for index-CAR uploads, labeled by log and outcome.
    fn inc_index_persists(&self, log_id: &str, outcome: &'static str);
    /// Sets the gauge for the size in bytes of the most recently uploaded index CAR.
    fn set_index_persist_bytes(&self, log_id: &str, bytes: u64);
    /// Increments a counter for GC runs, labeled by log.
    fn inc_gc_runs(&self, log_id: &str);
    /// Increments the total number of partial bundles swept by GC, labeled by log.
    fn inc_gc_bundles_swept(&self, log_id: &str, count: u64);
}
impl MaintenanceMetricsSink for NopSink {
    fn inc_index_persists(&self, _log_id: &str, _outcome: &'static str) {}
    fn set_index_persist_bytes(&self, _log_id: &str, _bytes: u64) {}
    fn inc_gc_runs(&self, _log_id: &str) {}
    fn inc_gc_bundles_swept(&self, _log_id: &str, _count: u64) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and code.
    fn inc_error(&self, kind: &'static str, code: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _code: &'static str) {}
}

/// A unified sink that implements all domain-specific traits, providing a single
/// point of implementation for metrics backends like Prometheus.
pub trait MetricsSink:
    StorageMetricsSink
    + PipelineMetricsSink
    + GatewayMetricsSink
    + MaintenanceMetricsSink
    + ErrorMetricsSink
{
}

impl<T> MetricsSink for T where
    T: StorageMetricsSink
        + PipelineMetricsSink
        + GatewayMetricsSink
        + MaintenanceMetricsSink
        + ErrorMetricsSink
{
}
