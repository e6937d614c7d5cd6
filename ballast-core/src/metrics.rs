//! Metrics events and sinks.
//!
//! Events are fire-and-forget: `record` returns nothing and sinks must not
//! block, so a slow or broken sink can never change a request's outcome.

use crate::{CircuitState, SourceKind};

/// Named observability event emitted by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// A response was satisfied by `source`.
    SourceUsed { source: SourceKind },
    /// A breaker changed state.
    BreakerTransition {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// A scoring submission was rejected because the pool was full.
    PoolSaturated { in_flight: usize, capacity: usize },
}

impl MetricEvent {
    /// Event name as exported to dashboards.
    pub fn name(&self) -> &'static str {
        match self {
            MetricEvent::SourceUsed { .. } => "source_used",
            MetricEvent::BreakerTransition { .. } => "breaker_transition",
            MetricEvent::PoolSaturated { .. } => "pool_saturated",
        }
    }
}

/// Receiver for [`MetricEvent`]s.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _event: MetricEvent) {}
}

/// Sink that writes every event to the tracing subscriber at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: MetricEvent) {
        match &event {
            MetricEvent::SourceUsed { source } => {
                tracing::debug!(event = event.name(), source = %source, "metric");
            }
            MetricEvent::BreakerTransition {
                dependency,
                from,
                to,
            } => {
                tracing::debug!(
                    event = event.name(),
                    dependency = %dependency,
                    from = %from,
                    to = %to,
                    "metric"
                );
            }
            MetricEvent::PoolSaturated {
                in_flight,
                capacity,
            } => {
                tracing::debug!(event = event.name(), in_flight, capacity, "metric");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            MetricEvent::SourceUsed {
                source: SourceKind::Cache
            }
            .name(),
            "source_used"
        );
        assert_eq!(
            MetricEvent::BreakerTransition {
                dependency: "cache".to_string(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            }
            .name(),
            "breaker_transition"
        );
        assert_eq!(
            MetricEvent::PoolSaturated {
                in_flight: 1,
                capacity: 1
            }
            .name(),
            "pool_saturated"
        );
    }

    #[test]
    fn test_sinks_accept_events() {
        let event = MetricEvent::SourceUsed {
            source: SourceKind::StaticDefault,
        };
        NoopMetricsSink.record(event.clone());
        TracingMetricsSink.record(event);
    }
}
