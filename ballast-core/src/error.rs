//! Error types for Ballast operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where a deadline was exceeded.
///
/// `Queued` and `Scoring` are kept apart so callers can tell a pool-queue
/// timeout (the job never started) from a slow computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    /// Waiting on the fallback cascade (cache or durable store).
    Resolve,
    /// Admitted to the scoring pool but no worker picked the job up.
    Queued,
    /// A worker was running the scoring function.
    Scoring,
}

impl TimeoutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPhase::Resolve => "resolve",
            TimeoutPhase::Queued => "queued",
            TimeoutPhase::Scoring => "scoring",
        }
    }
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by an external dependency (cache backend, durable store).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("{dependency} unreachable: {reason}")]
    Unreachable { dependency: String, reason: String },

    #[error("{dependency} rejected the operation: {reason}")]
    OperationFailed { dependency: String, reason: String },

    #[error("Serialization failed for {dependency}: {reason}")]
    Serialization { dependency: String, reason: String },

    #[error("{dependency} lock poisoned")]
    LockPoisoned { dependency: String },
}

impl DependencyError {
    pub fn unreachable(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn operation_failed(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Serialization {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised by a scoring function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ScoringError {
    pub reason: String,
}

impl ScoringError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown request class: {class}")]
    UnknownRequestClass { class: String },

    #[error("Artifact version {requested} is not newer than active version {active}")]
    VersionNotMonotonic { requested: u64, active: u64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Master error type for all Ballast errors.
///
/// The first four variants are the caller-facing taxonomy. Everything else is
/// an internal failure that is either recovered locally or surfaces as one of
/// them at the arbiter boundary.
#[derive(Debug, Clone, Error)]
pub enum BallastError {
    /// A breaker short-circuited the call. Recovered by the fallback cascade.
    #[error("Dependency unavailable: {dependency}")]
    DependencyUnavailable { dependency: String },

    /// A deadline elapsed. Says nothing about dependency health.
    #[error("Timed out during {phase} after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    /// The scoring pool is at capacity.
    #[error("Scoring pool saturated ({in_flight}/{capacity} in flight)")]
    Saturated { in_flight: usize, capacity: usize },

    /// The scoring function failed or panicked.
    #[error("Scoring computation failed: {reason}")]
    ComputationFailed { reason: String },

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BallastError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BallastError::Timeout { .. }
                | BallastError::Saturated { .. }
                | BallastError::DependencyUnavailable { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BallastError::Timeout { .. })
    }
}

impl From<ScoringError> for BallastError {
    fn from(err: ScoringError) -> Self {
        BallastError::ComputationFailed { reason: err.reason }
    }
}

/// Result type alias for Ballast operations.
pub type BallastResult<T> = Result<T, BallastError>;

// =============================================================================
// TESTS
// =============================================================================
