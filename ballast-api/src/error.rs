//! Error Types for the Ballast HTTP API
//!
//! - `ErrorCode` categorises failures and fixes their HTTP status
//! - `ApiError` is the JSON body every failing endpoint returns
//! - `From<BallastError>` maps the core taxonomy onto codes
//!
//! `Saturated` and `Timeout` carry a `retryable: true` detail so clients can
//! tell them from permanent failures without parsing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ballast_core::{BallastError, ConfigError, DependencyError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request body could not be parsed
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Request names a class the server does not serve
    UnknownRequestClass,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Artifact version is not newer than the active one
    VersionConflict,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// The scoring function failed or panicked
    ScoringFailed,

    /// Internal server error
    InternalError,

    /// Scoring pool is at capacity
    Saturated,

    /// A dependency is unavailable and no fallback applied
    DependencyUnavailable,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::UnknownRequestClass => StatusCode::BAD_REQUEST,

            ErrorCode::VersionConflict => StatusCode::CONFLICT,

            ErrorCode::Saturated | ErrorCode::DependencyUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::ScoringFailed | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::UnknownRequestClass => "Unknown request class",
            ErrorCode::VersionConflict => "Artifact version must increase",
            ErrorCode::ScoringFailed => "Scoring computation failed",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::Saturated => "Scoring capacity exhausted, retry later",
            ErrorCode::DependencyUnavailable => "Dependency unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<BallastError> for ApiError {
    fn from(err: BallastError) -> Self {
        match err {
            BallastError::Saturated {
                in_flight,
                capacity,
            } => ApiError::from_code(ErrorCode::Saturated).with_details(json!({
                "retryable": true,
                "in_flight": in_flight,
                "capacity": capacity,
            })),
            BallastError::Timeout { phase, after } => ApiError::new(
                ErrorCode::Timeout,
                format!("Timed out during {} after {}ms", phase, after.as_millis()),
            )
            .with_details(json!({
                "retryable": true,
                "phase": phase.as_str(),
            })),
            BallastError::ComputationFailed { reason } => {
                ApiError::new(ErrorCode::ScoringFailed, reason)
            }
            BallastError::DependencyUnavailable { dependency } => ApiError::new(
                ErrorCode::DependencyUnavailable,
                format!("{} unavailable", dependency),
            )
            .with_details(json!({ "retryable": true })),
            BallastError::Validation(v) => ApiError::from(v),
            BallastError::Dependency(e) => {
                tracing::error!(error = %e, "Unrecovered dependency error");
                match e {
                    DependencyError::Unreachable { .. } => {
                        ApiError::from_code(ErrorCode::DependencyUnavailable)
                    }
                    _ => ApiError::internal_error("Dependency operation failed"),
                }
            }
            BallastError::Config(e) => ApiError::from(e),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::RequiredFieldMissing { field } => {
                ApiError::new(ErrorCode::MissingField, message)
                    .with_details(json!({ "field": field }))
            }
            ValidationError::InvalidValue { field, .. } => {
                ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(json!({ "field": field }))
            }
            ValidationError::UnknownRequestClass { class } => {
                ApiError::new(ErrorCode::UnknownRequestClass, message)
                    .with_details(json!({ "class": class }))
            }
            ValidationError::VersionNotMonotonic { requested, active } => {
                ApiError::new(ErrorCode::VersionConflict, message)
                    .with_details(json!({ "requested": requested, "active": active }))
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!(error = %err, "Configuration error while serving request");
        ApiError::internal_error("Server misconfigured")
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::TimeoutPhase;
    use std::time::Duration;

    #[test]
    fn test_taxonomy_status_codes() {
        let cases = [
            (
                BallastError::Saturated {
                    in_flight: 4,
                    capacity: 4,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BallastError::Timeout {
                    phase: TimeoutPhase::Queued,
                    after: Duration::from_millis(100),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                BallastError::ComputationFailed {
                    reason: "boom".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ValidationError::UnknownRequestClass {
                    class: "bulk".to_string(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_retryable_details() {
        let err = ApiError::from(BallastError::Timeout {
            phase: TimeoutPhase::Scoring,
            after: Duration::from_millis(5),
        });
        let details = err.details.unwrap();
        assert_eq!(details["retryable"], json!(true));
        assert_eq!(details["phase"], json!("scoring"));

        let failed = ApiError::from(BallastError::ComputationFailed {
            reason: "x".to_string(),
        });
        assert_eq!(failed.code, ErrorCode::ScoringFailed);
        assert!(failed.details.is_none());
    }

    #[test]
    fn test_error_code_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ScoringFailed).unwrap(),
            "\"SCORING_FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::UnknownRequestClass).unwrap(),
            "\"UNKNOWN_REQUEST_CLASS\""
        );
    }

    #[test]
    fn test_version_conflict() {
        let err = ApiError::from(ValidationError::VersionNotMonotonic {
            requested: 1,
            active: 2,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
