//! Operational endpoints: artifact version, breaker state, cache statistics.

use axum::{extract::rejection::JsonRejection, extract::State, routing::get, Json, Router};
use ballast_core::{ArtifactVersion, CircuitState};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainingVersion {
    pub version: ArtifactVersion,
    /// Requests still pinned to this version.
    pub pins: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub active: ArtifactVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<ArtifactVersion>,
    pub draining: Vec<DrainingVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateVersionRequest {
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerView {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub since_transition_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub early_refreshes: u64,
    pub backend_errors: u64,
    pub hit_rate: f64,
}

// ============================================================================
// HANDLERS
// ============================================================================

fn version_response(state: &AppState, previous: Option<ArtifactVersion>) -> VersionResponse {
    let versions = state.arbiter.versions();
    VersionResponse {
        active: versions.active(),
        previous,
        draining: versions
            .draining()
            .into_iter()
            .map(|(version, pins)| DrainingVersion { version, pins })
            .collect(),
    }
}

pub async fn get_version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(version_response(&state, None))
}

/// Activate a newer artifact version. Older cache entries become unreachable.
pub async fn activate_version(
    State(state): State<AppState>,
    body: Result<Json<ActivateVersionRequest>, JsonRejection>,
) -> ApiResult<Json<VersionResponse>> {
    let Json(body) = body.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let previous = state
        .arbiter
        .activate_version(ArtifactVersion::new(body.version))?;
    Ok(Json(version_response(&state, Some(previous))))
}

pub async fn list_breakers(State(state): State<AppState>) -> Json<Vec<BreakerView>> {
    let views = state
        .arbiter
        .breakers()
        .snapshots()
        .into_iter()
        .map(|s| BreakerView {
            dependency: s.dependency,
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            failure_threshold: s.failure_threshold,
            open_duration_ms: s.open_duration.as_millis() as u64,
            since_transition_ms: s.since_transition.as_millis() as u64,
        })
        .collect();
    Json(views)
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let stats = state.arbiter.cache().stats();
    Json(CacheStatsResponse {
        hits: stats.hits,
        misses: stats.misses,
        early_refreshes: stats.early_refreshes,
        backend_errors: stats.backend_errors,
        hit_rate: stats.hit_rate(),
    })
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/artifact-version",
            get(get_version).put(activate_version),
        )
        .route("/v1/breakers", get(list_breakers))
        .route("/v1/cache/stats", get(cache_stats))
}
