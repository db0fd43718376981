#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Observability infrastructure for the tlog service: structured logging
//! initialization, a Prometheus metrics endpoint, and abstract sinks for
//! decoupling instrumentation from the backend.

/// A lightweight HTTP server exposing `/metrics` and `/healthz`.
pub mod http;
/// The initialization routine for global structured logging.
pub mod init;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) defining the contract for metrics reporting.
pub mod sinks;
/// A simple RAII timer for measuring flush duration.
pub mod time;

pub use sinks::{error_metrics, gateway_metrics, maintenance_metrics, pipeline_metrics, storage_metrics};
