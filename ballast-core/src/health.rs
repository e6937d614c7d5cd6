//! Unified health check types
//!
//! Used by the HTTP readiness endpoint to report dependency health derived
//! from breaker state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::CircuitState;

/// Health status for a service or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded
    Degraded,
    /// Component is not operational
    Unhealthy,
    /// Health status is unknown (e.g., not yet checked)
    Unknown,
}

impl HealthStatus {
    /// Combine two statuses, keeping the worse one.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        fn rank(s: HealthStatus) -> u8 {
            match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Unknown => 1,
                HealthStatus::Degraded => 2,
                HealthStatus::Unhealthy => 3,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            // A probe is in progress; the dependency is usable but unproven.
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        }
    }
}

/// Detailed health check result for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall health status
    pub status: HealthStatus,
    /// Component name
    pub component: String,
    /// Detailed status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    /// Create a healthy check result.
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            metadata: None,
        }
    }

    /// Create a degraded check result.
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Create an unhealthy check result.
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Health of a dependency as seen through its breaker.
    pub fn from_breaker(component: impl Into<String>, state: CircuitState) -> Self {
        let component = component.into();
        let check = match HealthStatus::from(state) {
            HealthStatus::Healthy => Self::healthy(component),
            HealthStatus::Degraded => Self::degraded(component, "breaker probing"),
            _ => Self::unhealthy(component, "breaker open"),
        };
        check.with_metadata("breaker_state", serde_json::json!(state.as_str()))
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}
