//! Ballast Telemetry - Observability Infrastructure
//!
//! Prometheus metrics and the tracing subscriber for the API layer.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, PrometheusMetricsSink, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, DEFAULT_FILTER};
