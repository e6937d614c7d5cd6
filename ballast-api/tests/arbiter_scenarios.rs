//! End-to-end arbiter behaviour: saturation, degradation, timeouts,
//! write-back and version swaps.

use std::sync::Arc;
use std::time::Duration;

use ballast_api::{Arbiter, POOL_DEPENDENCY};
use ballast_core::{
    ArtifactVersion, BallastConfig, BallastError, CircuitState, HealthStatus, ScoreOutput,
    SourceKind, TimeoutPhase, ValidationError, CACHE_DEPENDENCY, STORE_DEPENDENCY,
};
use ballast_storage::StampedeGuard;
use ballast_test_utils::fixtures::{payload, request, stored, test_config};
use ballast_test_utils::{
    FailingScorer, FlakyCacheBackend, FlakyDurableStore, GatedScorer, MockScorer,
    PanickingScorer, RecordingSink,
};
use serde_json::json;

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_two_queue_two_five_requests_one_saturated() {
    let gate = Arc::new(GatedScorer::new());
    let sink = Arc::new(RecordingSink::new());
    let arbiter = Arc::new(
        Arbiter::builder(test_config())
            .scorer(gate.clone())
            .metrics(sink.clone())
            .build()
            .unwrap(),
    );

    let tasks: Vec<_> = (0..5)
        .map(|n| {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.handle(request(n)).await })
        })
        .collect();

    // Hold the workers until admission has turned one request away.
    wait_for("saturation", || sink.count("pool_saturated") == 1).await;
    gate.open();

    let mut saturated = 0;
    let mut completed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(response) => {
                assert_eq!(response.source, SourceKind::Computed);
                completed += 1;
            }
            Err(BallastError::Saturated {
                in_flight,
                capacity,
            }) => {
                assert_eq!(capacity, 4);
                assert_eq!(in_flight, 4);
                saturated += 1;
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(saturated, 1);
    assert_eq!(completed, 4);
    assert_eq!(gate.finished(), 4);
    assert_eq!(sink.count("pool_saturated"), 1);
    arbiter.shutdown();
}

#[tokio::test]
async fn test_cache_and_store_down_serves_static_default() {
    let cache = Arc::new(FlakyCacheBackend::new());
    let store = Arc::new(FlakyDurableStore::new());
    let scorer = Arc::new(MockScorer::new());
    let sink = Arc::new(RecordingSink::new());
    let config = test_config();
    let arbiter = Arbiter::builder(config.clone())
        .scorer(scorer.clone())
        .cache_backend(cache.clone())
        .durable_store(store.clone())
        .metrics(sink.clone())
        .build()
        .unwrap();

    cache.set_failing(true);
    store.set_failing(true);

    // Three failures open both breakers (threshold 3).
    for n in 0..3 {
        let response = arbiter.handle(request(n)).await.unwrap();
        assert_eq!(response.source, SourceKind::StaticDefault);
        assert!(response.degraded);
    }
    for breaker in [CACHE_DEPENDENCY, STORE_DEPENDENCY] {
        assert_eq!(
            arbiter.breakers().get(breaker).unwrap().state(),
            CircuitState::Open
        );
    }

    // With both breakers open the dependencies are not touched at all.
    let (cache_calls, store_calls) = (cache.calls(), store.calls());
    let response = arbiter.handle(request(99)).await.unwrap();
    assert_eq!(response.output, ScoreOutput::new(config.static_default.clone()));
    assert!(response.degraded);
    assert_eq!(cache.calls(), cache_calls);
    assert_eq!(store.calls(), store_calls);

    // Degraded answers are never computed or cached.
    assert_eq!(scorer.calls(), 0);
    assert!(cache.is_empty());
    assert_eq!(
        sink.transitions(STORE_DEPENDENCY),
        vec![(CircuitState::Closed, CircuitState::Open)]
    );
    assert!(sink
        .sources()
        .iter()
        .all(|s| *s == SourceKind::StaticDefault));

    let health = arbiter.health();
    assert!(health
        .iter()
        .filter(|c| c.component != POOL_DEPENDENCY)
        .all(|c| c.status == HealthStatus::Unhealthy));
    arbiter.shutdown();
}

#[tokio::test]
async fn test_cache_outage_alone_still_computes() {
    let cache = Arc::new(FlakyCacheBackend::new());
    let scorer = Arc::new(MockScorer::new());
    let arbiter = Arbiter::builder(test_config())
        .scorer(scorer.clone())
        .cache_backend(cache.clone())
        .build()
        .unwrap();
    cache.set_failing(true);

    let response = arbiter.handle(request(4)).await.unwrap();
    assert_eq!(response.source, SourceKind::Computed);
    assert_eq!(response.output, MockScorer::expected(&payload(4)));

    // The store write-back succeeded, so the next request is served from it.
    let again = arbiter.handle(request(4)).await.unwrap();
    assert_eq!(again.source, SourceKind::DurableStore);
    assert_eq!(scorer.calls(), 1);
    arbiter.shutdown();
}

#[tokio::test]
async fn test_store_outage_alone_still_computes() {
    let store = Arc::new(FlakyDurableStore::new());
    let scorer = Arc::new(MockScorer::new());
    let sink = Arc::new(RecordingSink::new());
    let arbiter = Arbiter::builder(test_config())
        .scorer(scorer.clone())
        .durable_store(store.clone())
        .metrics(sink.clone())
        .build()
        .unwrap();
    store.set_failing(true);

    for n in 0..4 {
        let response = arbiter.handle(request(n)).await.unwrap();
        assert_eq!(response.source, SourceKind::Computed);
        assert_eq!(response.output, MockScorer::expected(&payload(n)));
        assert!(!response.degraded);
    }
    assert_eq!(
        arbiter.breakers().get(STORE_DEPENDENCY).unwrap().state(),
        CircuitState::Open
    );
    assert_eq!(
        arbiter.breakers().get(CACHE_DEPENDENCY).unwrap().state(),
        CircuitState::Closed
    );

    // Computed results still land in the healthy cache.
    let again = arbiter.handle(request(0)).await.unwrap();
    assert_eq!(again.source, SourceKind::Cache);
    assert_eq!(scorer.calls(), 4);
    assert!(!sink.sources().contains(&SourceKind::StaticDefault));
    arbiter.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_early_refresh_during_store_outage_recomputes() {
    let config = test_config()
        .with_cache_ttl(Duration::from_secs(1))
        .with_stampede_guard_fraction(0.99);
    let store = Arc::new(FlakyDurableStore::new());
    let scorer = Arc::new(MockScorer::new());
    let arbiter = Arbiter::builder(config)
        .scorer(scorer.clone())
        .durable_store(store.clone())
        .stampede_guard(StampedeGuard::seeded(0.99, 11))
        .build()
        .unwrap();

    let first = arbiter.handle(request(3)).await.unwrap();
    assert_eq!(first.source, SourceKind::Computed);
    store.set_failing(true);

    // Deep inside the guard window most readers are picked to refresh.
    tokio::time::sleep(Duration::from_millis(700)).await;
    for _ in 0..20 {
        let response = arbiter.handle(request(3)).await.unwrap();
        assert!(
            matches!(response.source, SourceKind::Cache | SourceKind::Computed),
            "live entry degraded to {:?}",
            response.source
        );
        assert!(!response.degraded);
        assert_eq!(response.output, first.output);
    }

    let early = arbiter.cache().stats().early_refreshes;
    assert!(early >= 1);
    assert!(scorer.calls() > 1);
    arbiter.shutdown();
}

#[tokio::test]
async fn test_panicking_scorer_fails_request_not_server() {
    let arbiter = Arbiter::builder(test_config())
        .scorer(Arc::new(PanickingScorer::on_explode()))
        .build()
        .unwrap();

    let err = arbiter
        .handle(ballast_core::ScoreRequest::new(json!({"explode": true})))
        .await
        .unwrap_err();
    assert!(matches!(err, BallastError::ComputationFailed { .. }));
    assert!(!err.is_retryable());

    let ok = arbiter.handle(request(1)).await.unwrap();
    assert_eq!(ok.source, SourceKind::Computed);
    arbiter.shutdown();
}

#[tokio::test]
async fn test_scoring_error_is_not_cached() {
    let cache = Arc::new(FlakyCacheBackend::new());
    let arbiter = Arbiter::builder(test_config())
        .scorer(Arc::new(FailingScorer::new("model rejected input")))
        .cache_backend(cache.clone())
        .build()
        .unwrap();

    for _ in 0..2 {
        match arbiter.handle(request(5)).await {
            Err(BallastError::ComputationFailed { reason }) => {
                assert!(reason.contains("model rejected input"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
    assert!(cache.is_empty());
    arbiter.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_timeout_is_distinct_from_scoring_timeout() {
    let gate = Arc::new(GatedScorer::new());
    let arbiter = Arc::new(
        Arbiter::builder(test_config().with_pool(1, 1))
            .scorer(gate.clone())
            .build()
            .unwrap(),
    );
    let deadline = Duration::from_millis(200);

    let running = {
        let arbiter = Arc::clone(&arbiter);
        tokio::spawn(async move { arbiter.handle(request(1).with_deadline(deadline)).await })
    };
    wait_for("first job to start", || gate.started() == 1).await;

    let queued = arbiter.handle(request(2).with_deadline(deadline)).await;
    let running = running.await.unwrap();
    gate.open();

    match running {
        Err(BallastError::Timeout { phase, .. }) => assert_eq!(phase, TimeoutPhase::Scoring),
        other => panic!("expected scoring timeout, got {:?}", other),
    }
    match queued {
        Err(e @ BallastError::Timeout { .. }) => {
            assert!(e.is_retryable());
            assert!(matches!(
                e,
                BallastError::Timeout {
                    phase: TimeoutPhase::Queued,
                    ..
                }
            ));
        }
        other => panic!("expected queue timeout, got {:?}", other),
    }

    // Capacity comes back once the abandoned jobs drain.
    wait_for("pool to drain", || arbiter.pool().in_flight() == 0).await;
    let ok = arbiter.handle(request(3)).await.unwrap();
    assert_eq!(ok.source, SourceKind::Computed);
    arbiter.shutdown();
}

#[tokio::test]
async fn test_store_hit_is_written_back_to_cache() {
    let store = Arc::new(FlakyDurableStore::new());
    let scorer = Arc::new(MockScorer::new());
    let sink = Arc::new(RecordingSink::new());
    let arbiter = Arbiter::builder(test_config())
        .scorer(scorer.clone())
        .durable_store(store.clone())
        .metrics(sink.clone())
        .build()
        .unwrap();

    let req = request(7);
    store.seed(&req.fingerprint(), stored(1, 0.7)).await;

    let first = arbiter.handle(req.clone()).await.unwrap();
    assert_eq!(first.source, SourceKind::DurableStore);
    assert_eq!(first.output, ScoreOutput::new(json!({"score": 0.7})));

    let second = arbiter.handle(req).await.unwrap();
    assert_eq!(second.source, SourceKind::Cache);
    assert_eq!(second.output, first.output);

    assert_eq!(scorer.calls(), 0);
    assert_eq!(
        sink.sources(),
        vec![SourceKind::DurableStore, SourceKind::Cache]
    );
    arbiter.shutdown();
}

#[tokio::test]
async fn test_version_swap_invalidates_cache_and_store() {
    let store = Arc::new(FlakyDurableStore::new());
    let scorer = Arc::new(MockScorer::new());
    let arbiter = Arbiter::builder(test_config())
        .scorer(scorer.clone())
        .durable_store(store.clone())
        .build()
        .unwrap();

    let first = arbiter.handle(request(8)).await.unwrap();
    assert_eq!(first.source, SourceKind::Computed);
    assert_eq!(first.artifact_version, ArtifactVersion::new(1));
    assert_eq!(
        arbiter.handle(request(8)).await.unwrap().source,
        SourceKind::Cache
    );

    let previous = arbiter.activate_version(ArtifactVersion::new(2)).unwrap();
    assert_eq!(previous, ArtifactVersion::new(1));

    let after = arbiter.handle(request(8)).await.unwrap();
    assert_eq!(after.source, SourceKind::Computed);
    assert_eq!(after.artifact_version, ArtifactVersion::new(2));
    assert_eq!(scorer.calls(), 2);
    assert_eq!(store.stores(), 2);

    let err = arbiter
        .activate_version(ArtifactVersion::new(2))
        .unwrap_err();
    assert!(matches!(
        err,
        BallastError::Validation(ValidationError::VersionNotMonotonic { .. })
    ));
    arbiter.shutdown();
}

#[tokio::test]
async fn test_request_classes_do_not_share_results() {
    let config = BallastConfig {
        request_classes: vec!["default".to_string(), "premium".to_string()],
        ..test_config()
    };
    let scorer = Arc::new(MockScorer::new());
    let arbiter = Arbiter::builder(config)
        .scorer(scorer.clone())
        .build()
        .unwrap();

    let standard = arbiter.handle(request(9)).await.unwrap();
    let premium = arbiter
        .handle(request(9).with_class("premium"))
        .await
        .unwrap();

    assert_ne!(standard.fingerprint, premium.fingerprint);
    assert_eq!(premium.source, SourceKind::Computed);
    assert_eq!(scorer.calls(), 2);
    assert_eq!(arbiter.request_classes(), vec!["default", "premium"]);
    arbiter.shutdown();
}
