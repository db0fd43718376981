//! A concrete implementation of the metrics sinks using the `prometheus` crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec, GaugeVec, HistogramVec, IntCounterVec,
    IntGaugeVec,
};

static POOL_IN_USE: OnceCell<prometheus::Gauge> = OnceCell::new();
static STORAGE_QUERY_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static STORAGE_QUERIES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

static ENTRIES_APPENDED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static FLUSH_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static TREE_SIZE: OnceCell<GaugeVec> = OnceCell::new();
static CHECKPOINTS_PUBLISHED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static QUEUE_DEPTH: OnceCell<IntGaugeVec> = OnceCell::new();

static GATEWAY_REQUEST_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static GATEWAY_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static GATEWAY_RATE_LIMITED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

static INDEX_PERSISTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static INDEX_PERSIST_BYTES: OnceCell<GaugeVec> = OnceCell::new();
static GC_RUNS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static GC_BUNDLES_SWEPT_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// The Prometheus-backed [`MetricsSink`] implementation.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Fetches a registered collector, panicking if `install()` has not run yet.
/// This is an application setup error, not a runtime condition to recover from.
macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("prometheus sink not initialized; call tlog_telemetry::prometheus::install() first")
    };
}

impl StorageMetricsSink for PrometheusSink {
    fn observe_query_duration(&self, op: &str, duration_secs: f64) {
        get_metric!(STORAGE_QUERY_DURATION_SECONDS)
            .with_label_values(&[op])
            .observe(duration_secs);
    }
    fn inc_queries_total(&self, op: &str, outcome: &'static str) {
        get_metric!(STORAGE_QUERIES_TOTAL)
            .with_label_values(&[op, outcome])
            .inc();
    }
    fn set_pool_in_use(&self, count: u64) {
        get_metric!(POOL_IN_USE).set(count as f64);
    }
}

impl PipelineMetricsSink for PrometheusSink {
    fn inc_entries_appended(&self, log_id: &str, count: u64) {
        get_metric!(ENTRIES_APPENDED_TOTAL)
            .with_label_values(&[log_id])
            .inc_by(count);
    }
    fn observe_flush_duration(&self, log_id: &str, duration_secs: f64) {
        get_metric!(FLUSH_DURATION_SECONDS)
            .with_label_values(&[log_id])
            .observe(duration_secs);
    }
    fn set_tree_size(&self, log_id: &str, size: u64) {
        get_metric!(TREE_SIZE)
            .with_label_values(&[log_id])
            .set(size as f64);
    }
    fn inc_checkpoints_published(&self, log_id: &str) {
        get_metric!(CHECKPOINTS_PUBLISHED_TOTAL)
            .with_label_values(&[log_id])
            .inc();
    }
    fn set_queue_depth(&self, log_id: &str, depth: u64) {
        get_metric!(QUEUE_DEPTH)
            .with_label_values(&[log_id])
            .set(depth as i64);
    }
}

impl GatewayMetricsSink for PrometheusSink {
    fn observe_request_duration(&self, route: &str, duration_secs: f64) {
        get_metric!(GATEWAY_REQUEST_DURATION_SECONDS)
            .with_label_values(&[route])
            .observe(duration_secs);
    }
    fn inc_requests_total(&self, route: &str, status_code: u16) {
        get_metric!(GATEWAY_REQUESTS_TOTAL)
            .with_label_values(&[route, &status_code.to_string()])
            .inc();
    }
    fn inc_rate_limited(&self, route: &str) {
        get_metric!(GATEWAY_RATE_LIMITED_TOTAL)
            .with_label_values(&[route])
            .inc();
    }
}

impl MaintenanceMetricsSink for PrometheusSink {
    fn inc_index_persists(&self, log_id: &str, outcome: &'static str) {
        get_metric!(INDEX_PERSISTS_TOTAL)
            .with_label_values(&[log_id, outcome])
            .inc();
    }
    fn set_index_persist_bytes(&self, log_id: &str, bytes: u64) {
        get_metric!(INDEX_PERSIST_BYTES)
            .with_label_values(&[log_id])
            .set(bytes as f64);
    }
    fn inc_gc_runs(&self, log_id: &str) {
        get_metric!(GC_RUNS_TOTAL).with_label_values(&[log_id]).inc();
    }
    fn inc_gc_bundles_swept(&self, log_id: &str, count: u64) {
        get_metric!(GC_BUNDLES_SWEPT_TOTAL)
            .with_label_values(&[log_id])
            .inc_by(count);
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, code: &'static str) {
        get_metric!(ERRORS_TOTAL).with_label_values(&[kind, code]).inc();
    }
}

/// Registers all collectors and returns a static reference to the sink.
/// Must be called exactly once at process startup, before any metrics are recorded.
#[allow(clippy::expect_used)]
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    POOL_IN_USE
        .set(register_gauge!(
            "tlog_storage_pool_connections_in_use",
            "Connections currently checked out of the per-log state store pool."
        )?)
        .expect("static already initialized");
    STORAGE_QUERY_DURATION_SECONDS
        .set(register_histogram_vec!(
            "tlog_storage_query_duration_seconds",
            "Latency of state store round-trips.",
            &["op"],
            exponential_buckets(0.0005, 2.0, 16)?
        )?)
        .expect("static already initialized");
    STORAGE_QUERIES_TOTAL
        .set(register_int_counter_vec!(
            "tlog_storage_queries_total",
            "Total state store operations.",
            &["op", "outcome"]
        )?)
        .expect("static already initialized");
    ENTRIES_APPENDED_TOTAL
        .set(register_int_counter_vec!(
            "tlog_entries_appended_total",
            "Total entries successfully appended.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    FLUSH_DURATION_SECONDS
        .set(register_histogram_vec!(
            "tlog_flush_duration_seconds",
            "Latency of a single append-pipeline flush.",
            &["log_id"],
            exponential_buckets(0.001, 2.0, 16)?
        )?)
        .expect("static already initialized");
    TREE_SIZE
        .set(register_gauge_vec!(
            "tlog_tree_size",
            "Current integrated tree size.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    CHECKPOINTS_PUBLISHED_TOTAL
        .set(register_int_counter_vec!(
            "tlog_checkpoints_published_total",
            "Total checkpoints published.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    QUEUE_DEPTH
        .set(register_int_gauge_vec!(
            "tlog_queue_depth",
            "Current depth of the pending-entry batch queue.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    GATEWAY_REQUEST_DURATION_SECONDS
        .set(register_histogram_vec!(
            "tlog_gateway_request_duration_seconds",
            "Latency of gateway requests.",
            &["route"],
            exponential_buckets(0.001, 2.0, 15)?
        )?)
        .expect("static already initialized");
    GATEWAY_REQUESTS_TOTAL
        .set(register_int_counter_vec!(
            "tlog_gateway_requests_total",
            "Total gateway requests.",
            &["route", "status"]
        )?)
        .expect("static already initialized");
    GATEWAY_RATE_LIMITED_TOTAL
        .set(register_int_counter_vec!(
            "tlog_gateway_rate_limited_total",
            "Total requests rejected by the per-IP rate limiter.",
            &["route"]
        )?)
        .expect("static already initialized");
    INDEX_PERSISTS_TOTAL
        .set(register_int_counter_vec!(
            "tlog_index_persists_total",
            "Total index-CAR uploads attempted.",
            &["log_id", "outcome"]
        )?)
        .expect("static already initialized");
    INDEX_PERSIST_BYTES
        .set(register_gauge_vec!(
            "tlog_index_persist_bytes",
            "Size of the most recently uploaded index CAR.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    GC_RUNS_TOTAL
        .set(register_int_counter_vec!(
            "tlog_gc_runs_total",
            "Total garbage collection runs.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    GC_BUNDLES_SWEPT_TOTAL
        .set(register_int_counter_vec!(
            "tlog_gc_bundles_swept_total",
            "Total partial bundles swept by garbage collection.",
            &["log_id"]
        )?)
        .expect("static already initialized");
    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "tlog_errors_total",
            "Total errors, categorized by component kind and error code.",
            &["kind", "code"]
        )?)
        .expect("static already initialized");

    static SINK: PrometheusSink = PrometheusSink;
    Ok(&SINK)
}
