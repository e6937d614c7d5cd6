//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health/ping - Simple liveness check
//! - /health/ready - Dependency breakers and scoring pool
//! - /health/live - Process alive check
//!
//! Readiness stays 200 while degraded: an open breaker means responses fall
//! back, not that the service stopped answering.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use ballast_core::{ArtifactVersion, HealthCheck, HealthStatus};
use serde::{Deserialize, Serialize};

use super::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub components: Vec<HealthCheck>,
    pub artifact_version: ArtifactVersion,
    pub version: String,
    pub uptime_seconds: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let components = state.arbiter.health();
    let status = overall_status(&components);
    let message = (status != HealthStatus::Healthy).then(|| {
        let impaired: Vec<&str> = components
            .iter()
            .filter(|c| c.status != HealthStatus::Healthy)
            .map(|c| c.component.as_str())
            .collect();
        format!("Degraded: {}", impaired.join(", "))
    });

    let response = HealthResponse {
        status,
        message,
        details: Some(HealthDetails {
            components,
            artifact_version: state.arbiter.active_version(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    (StatusCode::OK, Json(response))
}

/// Healthy only when every component is; anything else reads as degraded.
fn overall_status(components: &[HealthCheck]) -> HealthStatus {
    if components.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health/ping", get(ping))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}
