//! State machine behaviour of `DependencyBreaker` under time and concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_breaker::{BreakerRegistry, CallError, DependencyBreaker};
use ballast_core::{
    BallastConfig, BreakerConfig, CircuitState, MetricEvent, MetricsSink, STORE_DEPENDENCY,
};
use proptest::prelude::*;

#[derive(Default)]
struct Transitions(Mutex<Vec<(CircuitState, CircuitState)>>);

impl MetricsSink for Transitions {
    fn record(&self, event: MetricEvent) {
        if let MetricEvent::BreakerTransition { from, to, .. } = event {
            self.0.lock().unwrap().push((from, to));
        }
    }
}

impl Transitions {
    fn seen(&self) -> Vec<(CircuitState, CircuitState)> {
        self.0.lock().unwrap().clone()
    }
}

fn store_breaker(threshold: u32, open: Duration) -> (Arc<DependencyBreaker>, Arc<Transitions>) {
    let sink = Arc::new(Transitions::default());
    let breaker = DependencyBreaker::new(STORE_DEPENDENCY, BreakerConfig::new(threshold, open))
        .with_metrics(sink.clone());
    (Arc::new(breaker), sink)
}

async fn failing_call(breaker: &DependencyBreaker) -> Result<(), CallError<String>> {
    breaker
        .call(|| async { Err::<(), _>("connection refused".to_string()) })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_emits_every_transition() {
    let (breaker, sink) = store_breaker(3, Duration::from_secs(5));

    for _ in 0..3 {
        failing_call(&breaker).await.ok();
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(5)).await;
    breaker
        .call(|| async { Ok::<_, String>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    assert_eq!(
        sink.seen(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_rejects_until_exactly_open_duration() {
    let (breaker, _) = store_breaker(1, Duration::from_secs(5));
    failing_call(&breaker).await.ok();

    tokio::time::advance(Duration::from_millis(4_999)).await;
    assert!(failing_call(&breaker).await.unwrap_err().is_open());

    tokio::time::advance(Duration::from_millis(1)).await;
    let permit = breaker.try_acquire().expect("probe admitted at open_duration");
    assert!(permit.is_probe());
    permit.success();
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_exactly_one_of_ten_concurrent_calls() {
    let (breaker, _) = store_breaker(1, Duration::from_secs(5));
    failing_call(&breaker).await.ok();
    tokio::time::advance(Duration::from_secs(5)).await;

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let breaker = breaker.clone();
        let invocations = invocations.clone();
        handles.push(tokio::spawn(async move {
            breaker
                .call(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(())
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            assert!(e.is_open());
            rejected += 1;
        }
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(rejected, 9);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_returns_to_open_for_full_duration() {
    let (breaker, sink) = store_breaker(2, Duration::from_secs(1));
    failing_call(&breaker).await.ok();
    failing_call(&breaker).await.ok();
    tokio::time::advance(Duration::from_secs(1)).await;

    let err = failing_call(&breaker).await.unwrap_err();
    assert!(matches!(err, CallError::Failed(_)));
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(
        sink.seen().last(),
        Some(&(CircuitState::HalfOpen, CircuitState::Open))
    );

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(failing_call(&breaker).await.unwrap_err().is_open());
}

#[tokio::test(start_paused = true)]
async fn test_probe_deadline_keeps_half_open_and_frees_slot() {
    let (breaker, _) = store_breaker(1, Duration::from_secs(1));
    failing_call(&breaker).await.ok();
    tokio::time::advance(Duration::from_secs(1)).await;

    let result: Result<(), CallError<String>> = breaker
        .call_with_deadline(Duration::from_millis(50), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
    assert!(result.unwrap_err().is_deadline());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let permit = breaker.try_acquire().expect("slot freed after deadline");
    assert!(permit.is_probe());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_frees_slot() {
    let (breaker, _) = store_breaker(1, Duration::from_secs(1));
    failing_call(&breaker).await.ok();
    tokio::time::advance(Duration::from_secs(1)).await;

    let probing = breaker.clone();
    let task = tokio::spawn(async move {
        probing
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            })
            .await
    });
    tokio::task::yield_now().await;
    assert!(breaker.try_acquire().is_none());

    task.abort();
    let _ = task.await;
    assert!(breaker.try_acquire().is_some());
}

#[tokio::test]
async fn test_registry_breakers_are_independent() {
    let config = BallastConfig::default();
    let registry = BreakerRegistry::from_config(
        &config.with_breaker(STORE_DEPENDENCY, BreakerConfig::new(1, Duration::from_secs(30))),
        Arc::new(ballast_core::NoopMetricsSink),
    );
    let store = registry.require(STORE_DEPENDENCY).unwrap();
    failing_call(&store).await.ok();

    let states: Vec<_> = registry
        .snapshots()
        .into_iter()
        .map(|s| (s.dependency, s.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("cache".to_string(), CircuitState::Closed),
            ("durable_store".to_string(), CircuitState::Open),
        ]
    );
}

proptest! {
    /// With a long open duration, the breaker opens exactly when it first sees
    /// `threshold` consecutive failures and never admits another call.
    #[test]
    fn prop_opens_on_first_run_of_threshold_failures(
        threshold in 1u32..6,
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let breaker = DependencyBreaker::new(
            "cache",
            BreakerConfig::new(threshold, Duration::from_secs(3600)),
        );

        let mut run = 0u32;
        let mut opened = false;
        for ok in outcomes {
            match breaker.try_acquire() {
                Some(permit) => {
                    prop_assert!(!opened);
                    if ok {
                        run = 0;
                        permit.success();
                    } else {
                        run += 1;
                        permit.failure();
                    }
                    if run >= threshold {
                        opened = true;
                    }
                }
                None => prop_assert!(opened),
            }
            let expected = if opened { CircuitState::Open } else { CircuitState::Closed };
            prop_assert_eq!(breaker.state(), expected);
            if !opened {
                prop_assert_eq!(breaker.consecutive_failures(), run);
            }
        }
    }
}
