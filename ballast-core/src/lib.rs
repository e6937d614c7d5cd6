//! Ballast Core - Shared Types
//!
//! Data structures, configuration, error taxonomy and the narrow collaborator
//! traits (scoring function, durable store, metrics sink) that every other
//! Ballast crate depends on. Behaviour lives in `ballast-breaker`,
//! `ballast-storage` and `ballast-api`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub mod circuit;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod metrics;

pub use circuit::{CircuitState, CircuitStateParseError, CACHE_DEPENDENCY, STORE_DEPENDENCY};
pub use collaborators::{DurableStore, Scorer};
pub use config::{BallastConfig, BreakerConfig};
pub use error::{
    BallastError, BallastResult, ConfigError, DependencyError, ScoringError, TimeoutPhase,
    ValidationError,
};
pub use fingerprint::Fingerprint;
pub use health::{HealthCheck, HealthStatus};
pub use metrics::{MetricEvent, MetricsSink, NoopMetricsSink, TracingMetricsSink};

/// Request class used when a request does not name one.
pub const DEFAULT_REQUEST_CLASS: &str = "default";

// ============================================================================
// ARTIFACT VERSION
// ============================================================================

/// Identifier of the active scoring logic/model. Monotonically increasing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ArtifactVersion(pub u64);

impl ArtifactVersion {
    pub fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ArtifactVersion {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

// ============================================================================
// REQUESTS AND RESULTS
// ============================================================================

/// Inbound scoring request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Request class; selects the fallback cascade. Defaults to `"default"`.
    #[serde(default = "default_request_class")]
    pub class: String,
    /// Scoring input.
    pub payload: Value,
    /// Per-request deadline overriding the configured request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
}

fn default_request_class() -> String {
    DEFAULT_REQUEST_CLASS.to_string()
}

impl ScoreRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            class: default_request_class(),
            payload,
            deadline: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Reject requests the arbiter cannot fingerprint meaningfully.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.class.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "class".to_string(),
            });
        }
        if self.payload.is_null() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "payload".to_string(),
            });
        }
        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ValidationError::InvalidValue {
                    field: "deadline".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.class, &self.payload)
    }
}

/// Output of the scoring function. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreOutput(pub Value);

impl ScoreOutput {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Record kept by the durable store, stamped with the version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredScore {
    pub version: ArtifactVersion,
    pub output: ScoreOutput,
    pub computed_at: DateTime<Utc>,
}

impl StoredScore {
    pub fn new(version: ArtifactVersion, output: ScoreOutput) -> Self {
        Self {
            version,
            output,
            computed_at: Utc::now(),
        }
    }
}

/// Source that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cache,
    DurableStore,
    StaticDefault,
    Computed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cache => "cache",
            SourceKind::DurableStore => "durable_store",
            SourceKind::StaticDefault => "static_default",
            SourceKind::Computed => "computed",
        }
    }

    /// Whether this response came from the degraded path.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SourceKind::StaticDefault)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
