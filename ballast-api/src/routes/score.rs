//! Scoring endpoint.

use std::time::Duration;

use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use ballast_core::{ScoreRequest, DEFAULT_REQUEST_CLASS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AppState;
use crate::arbiter::ScoreResponse;
use crate::error::{ApiError, ApiResult};

/// Body of `POST /v1/score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequestBody {
    #[serde(default)]
    pub class: Option<String>,
    pub payload: Value,
    /// Per-request deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl From<ScoreRequestBody> for ScoreRequest {
    fn from(body: ScoreRequestBody) -> Self {
        ScoreRequest {
            class: body
                .class
                .unwrap_or_else(|| DEFAULT_REQUEST_CLASS.to_string()),
            payload: body.payload,
            deadline: body.deadline_ms.map(Duration::from_millis),
        }
    }
}

/// Score a payload, from cache, durable store, or a fresh computation.
pub async fn score(
    State(state): State<AppState>,
    body: Result<Json<ScoreRequestBody>, JsonRejection>,
) -> ApiResult<Json<ScoreResponse>> {
    let Json(body) = body.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let response = state.arbiter.handle(body.into()).await?;
    Ok(Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/v1/score", post(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_conversion_defaults() {
        let body: ScoreRequestBody = serde_json::from_value(json!({"payload": {"a": 1}})).unwrap();
        let request = ScoreRequest::from(body);
        assert_eq!(request.class, DEFAULT_REQUEST_CLASS);
        assert!(request.deadline.is_none());
    }

    #[test]
    fn test_body_conversion_deadline() {
        let body: ScoreRequestBody = serde_json::from_value(json!({
            "class": "premium",
            "payload": [1, 2],
            "deadline_ms": 150
        }))
        .unwrap();
        let request = ScoreRequest::from(body);
        assert_eq!(request.class, "premium");
        assert_eq!(request.deadline, Some(Duration::from_millis(150)));
    }
}
