//! Prometheus Metrics Definitions
//!
//! `PrometheusMetricsSink` is the production [`MetricsSink`]: every core event
//! becomes a counter increment, and the HTTP layer adds request counts and
//! latency. Each sink owns its own `Registry` so tests can build as many as
//! they like without colliding on metric names.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use ballast_core::{MetricEvent, MetricsSink};
use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

/// Request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const REQUEST_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Process-wide sink used by the server binary - initialized once at startup
pub static METRICS: Lazy<ApiResult<Arc<PrometheusMetricsSink>>> =
    Lazy::new(|| PrometheusMetricsSink::new().map(Arc::new));

/// Container for all Ballast metrics.
#[derive(Clone)]
pub struct PrometheusMetricsSink {
    registry: Registry,

    /// Responses by satisfying source - labels: source
    pub source_used_total: CounterVec,

    /// Breaker state changes - labels: dependency, from, to
    pub breaker_transitions_total: CounterVec,

    /// Scoring submissions rejected at admission
    pub pool_saturated_total: Counter,

    /// Requests by outcome - labels: outcome
    pub requests_total: CounterVec,

    /// End-to-end request latency - labels: outcome
    pub request_duration_seconds: HistogramVec,

    /// Scoring jobs admitted and not yet finished
    pub pool_in_flight: Gauge,
}

fn registration_failed(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl PrometheusMetricsSink {
    /// Create and register all metrics on a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let source_used_total = CounterVec::new(
            Opts::new(
                "ballast_source_used_total",
                "Responses served, by the source that satisfied them",
            ),
            &["source"],
        )
        .map_err(|e| registration_failed("source_used_total", e))?;

        let breaker_transitions_total = CounterVec::new(
            Opts::new(
                "ballast_breaker_transitions_total",
                "Dependency breaker state transitions",
            ),
            &["dependency", "from", "to"],
        )
        .map_err(|e| registration_failed("breaker_transitions_total", e))?;

        let pool_saturated_total = Counter::new(
            "ballast_pool_saturated_total",
            "Scoring submissions rejected because the pool was full",
        )
        .map_err(|e| registration_failed("pool_saturated_total", e))?;

        let requests_total = CounterVec::new(
            Opts::new("ballast_requests_total", "Scoring requests by outcome"),
            &["outcome"],
        )
        .map_err(|e| registration_failed("requests_total", e))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ballast_request_duration_seconds",
                "Scoring request duration in seconds",
            )
            .buckets(REQUEST_LATENCY_BUCKETS.to_vec()),
            &["outcome"],
        )
        .map_err(|e| registration_failed("request_duration_seconds", e))?;

        let pool_in_flight = Gauge::new(
            "ballast_pool_in_flight",
            "Scoring jobs admitted to the pool and not yet finished",
        )
        .map_err(|e| registration_failed("pool_in_flight", e))?;

        registry
            .register(Box::new(source_used_total.clone()))
            .map_err(|e| registration_failed("source_used_total", e))?;
        registry
            .register(Box::new(breaker_transitions_total.clone()))
            .map_err(|e| registration_failed("breaker_transitions_total", e))?;
        registry
            .register(Box::new(pool_saturated_total.clone()))
            .map_err(|e| registration_failed("pool_saturated_total", e))?;
        registry
            .register(Box::new(requests_total.clone()))
            .map_err(|e| registration_failed("requests_total", e))?;
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .map_err(|e| registration_failed("request_duration_seconds", e))?;
        registry
            .register(Box::new(pool_in_flight.clone()))
            .map_err(|e| registration_failed("pool_in_flight", e))?;

        Ok(Self {
            registry,
            source_used_total,
            breaker_transitions_total,
            pool_saturated_total,
            requests_total,
            request_duration_seconds,
            pool_in_flight,
        })
    }

    /// Record one finished scoring request.
    pub fn observe_request(&self, outcome: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn set_pool_in_flight(&self, in_flight: usize) {
        self.pool_in_flight.set(in_flight as f64);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> ApiResult<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::SourceUsed { source } => {
                self.source_used_total
                    .with_label_values(&[source.as_str()])
                    .inc();
            }
            MetricEvent::BreakerTransition {
                dependency,
                from,
                to,
            } => {
                self.breaker_transitions_total
                    .with_label_values(&[dependency.as_str(), from.as_str(), to.as_str()])
                    .inc();
            }
            MetricEvent::PoolSaturated { in_flight, .. } => {
                self.pool_saturated_total.inc();
                self.set_pool_in_flight(in_flight);
            }
        }
    }
}

impl std::fmt::Debug for PrometheusMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricsSink").finish_non_exhaustive()
    }
}

/// Prometheus metrics endpoint handler.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_pool_in_flight(state.arbiter.pool().in_flight());

    match state.metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
