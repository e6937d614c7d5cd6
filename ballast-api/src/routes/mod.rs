//! REST API Routes Module
//!
//! - `POST /v1/score` - score a payload
//! - `GET|PUT /v1/artifact-version` - inspect or advance the artifact version
//! - `GET /v1/breakers`, `GET /v1/cache/stats` - operational state
//! - `/health/*` - Kubernetes-compatible health checks
//! - `/metrics` - Prometheus exposition

pub mod admin;
pub mod health;
pub mod score;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::arbiter::Arbiter;
use crate::telemetry::{metrics_handler, observability_middleware, PrometheusMetricsSink};

pub use admin::create_router as admin_router;
pub use health::create_router as health_router;
pub use score::create_router as score_router;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub arbiter: Arc<Arbiter>,
    pub metrics: Arc<PrometheusMetricsSink>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(arbiter: Arc<Arbiter>, metrics: Arc<PrometheusMetricsSink>) -> Self {
        Self {
            arbiter,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Build the complete application router.
pub fn create_api_router(state: AppState) -> Router {
    // Only scoring traffic feeds the request metrics.
    let scoring = score_router().layer(from_fn_with_state(
        state.clone(),
        observability_middleware,
    ));

    Router::new()
        .merge(scoring)
        .merge(admin_router())
        .merge(health_router())
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
