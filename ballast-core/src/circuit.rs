//! Breaker state shared between the breaker crate, health reporting and metrics.

use serde::{Deserialize, Serialize};

/// Dependency name used for the cache backend breaker.
pub const CACHE_DEPENDENCY: &str = "cache";

/// Dependency name used for the durable store breaker.
pub const STORE_DEPENDENCY: &str = "durable_store";

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed = 0,
    /// Circuit is open, calls are rejected without reaching the dependency
    Open = 1,
    /// Circuit is half-open, a single probe is testing the dependency
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Parse from the label produced by [`CircuitState::as_str`].
    pub fn parse(s: &str) -> Result<Self, CircuitStateParseError> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            _ => Err(CircuitStateParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing CircuitState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStateParseError(pub String);

impl std::fmt::Display for CircuitStateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid circuit state: {}", self.0)
    }
}

impl std::error::Error for CircuitStateParseError {}
