//! Breakers for every configured dependency, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use ballast_core::{BallastConfig, BallastResult, ConfigError, MetricsSink};

use crate::breaker::{BreakerSnapshot, DependencyBreaker};

/// Read-only set of breakers keyed by dependency name.
///
/// There is no way to add, replace, or reset a breaker after construction.
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    breakers: BTreeMap<String, Arc<DependencyBreaker>>,
}

impl BreakerRegistry {
    /// One breaker per entry in `config.breakers`.
    pub fn from_config(config: &BallastConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let breakers = config
            .breakers
            .iter()
            .map(|(dependency, breaker_config)| {
                let breaker = DependencyBreaker::new(dependency.clone(), *breaker_config)
                    .with_metrics(sink.clone());
                (dependency.clone(), Arc::new(breaker))
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<DependencyBreaker>> {
        self.breakers.get(dependency).cloned()
    }

    /// Like `get`, but a missing breaker is a configuration error.
    pub fn require(&self, dependency: &str) -> BallastResult<Arc<DependencyBreaker>> {
        self.get(dependency).ok_or_else(|| {
            ConfigError::MissingRequired {
                field: format!("breakers.{}", dependency),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DependencyBreaker>> {
        self.breakers.values()
    }

    /// Snapshots ordered by dependency name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::{
        BallastError, BreakerConfig, CircuitState, NoopMetricsSink, CACHE_DEPENDENCY,
        STORE_DEPENDENCY,
    };
    use std::time::Duration;

    #[test]
    fn test_default_config_builds_both_breakers() {
        let registry = BreakerRegistry::from_config(&BallastConfig::default(), Arc::new(NoopMetricsSink));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(CACHE_DEPENDENCY).is_some());
        assert!(registry.get(STORE_DEPENDENCY).is_some());
        assert!(registry
            .snapshots()
            .iter()
            .all(|s| s.state == CircuitState::Closed));
    }

    #[test]
    fn test_breaker_uses_configured_settings() {
        let config = BallastConfig::default()
            .with_breaker(CACHE_DEPENDENCY, BreakerConfig::new(2, Duration::from_millis(10)));
        let registry = BreakerRegistry::from_config(&config, Arc::new(NoopMetricsSink));
        let cache = registry.require(CACHE_DEPENDENCY).unwrap();
        assert_eq!(cache.config().failure_threshold, 2);
        assert_eq!(cache.dependency(), CACHE_DEPENDENCY);
    }

    #[test]
    fn test_require_missing_is_config_error() {
        let registry = BreakerRegistry::default();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.require("scoring"),
            Err(BallastError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_clones_share_breakers() {
        let registry = BreakerRegistry::from_config(&BallastConfig::default(), Arc::new(NoopMetricsSink));
        let copy = registry.clone();
        assert!(Arc::ptr_eq(
            &registry.get(STORE_DEPENDENCY).unwrap(),
            &copy.get(STORE_DEPENDENCY).unwrap()
        ));
    }
}
