//! Axum middleware recording request outcomes and latency.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::routes::AppState;

/// Label a response for `ballast_requests_total`.
fn outcome_label(status: u16) -> &'static str {
    match status {
        200..=299 => "ok",
        400..=499 => "rejected",
        503 => "unavailable",
        504 => "timeout",
        _ => "error",
    }
}

/// Records every scoring request into the Prometheus sink.
pub async fn observability_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    state
        .metrics
        .observe_request(outcome_label(status), elapsed.as_secs_f64());

    tracing::debug!(
        http.method = %method,
        http.path = %path,
        http.status = status,
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );

    response
}
