//! Ballast Test Utilities
//!
//! Centralized test infrastructure for the Ballast workspace:
//! - Mock scoring functions (counting, gated, failing, panicking)
//! - Fault-injecting cache backend and durable store
//! - A metrics sink that records every event
//! - Proptest generators and fixtures

pub use ballast_core::{
    ArtifactVersion, BallastConfig, BallastError, BallastResult, BreakerConfig, CircuitState,
    DependencyError, DurableStore, Fingerprint, MetricEvent, MetricsSink, ScoreOutput,
    ScoreRequest, Scorer, ScoringError, SourceKind, StoredScore, CACHE_DEPENDENCY,
    STORE_DEPENDENCY,
};
pub use ballast_storage::{
    BackendEntry, CacheBackend, InMemoryCacheBackend, InMemoryDurableStore,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

// ============================================================================
// MOCK SCORERS
// ============================================================================

/// Deterministic scorer that counts its invocations.
///
/// Output is `{"score": <sum of numeric top-level fields>}`.
#[derive(Debug, Default)]
pub struct MockScorer {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the worker thread for `delay` on every call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The output this scorer produces for `input`.
    pub fn expected(input: &Value) -> ScoreOutput {
        let sum: f64 = input
            .as_object()
            .map(|fields| fields.values().filter_map(Value::as_f64).sum())
            .unwrap_or(0.0);
        ScoreOutput::new(json!({ "score": sum }))
    }
}

impl Scorer for MockScorer {
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(Self::expected(input))
    }
}

/// Scorer that blocks every call until [`GatedScorer::open`] is called.
///
/// Lets a test hold worker threads busy for as long as it needs.
#[derive(Debug, Default)]
pub struct GatedScorer {
    open: Mutex<bool>,
    cond: Condvar,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every blocked and future call.
    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        *open = true;
        self.cond.notify_all();
    }

    /// Calls that have entered `score`.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Scorer for GatedScorer {
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap_or_else(|p| p.into_inner());
        while !*open {
            open = self.cond.wait(open).unwrap_or_else(|p| p.into_inner());
        }
        drop(open);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(MockScorer::expected(input))
    }
}

/// Scorer that always returns an error.
#[derive(Debug, Clone)]
pub struct FailingScorer {
    reason: String,
}

impl FailingScorer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Scorer for FailingScorer {
    fn score(&self, _input: &Value) -> Result<ScoreOutput, ScoringError> {
        Err(ScoringError::new(self.reason.clone()))
    }
}

/// Scorer that panics, optionally only for payloads containing `"explode": true`.
#[derive(Debug, Clone, Default)]
pub struct PanickingScorer {
    only_on_explode: bool,
}

impl PanickingScorer {
    pub fn always() -> Self {
        Self {
            only_on_explode: false,
        }
    }

    pub fn on_explode() -> Self {
        Self {
            only_on_explode: true,
        }
    }
}

impl Scorer for PanickingScorer {
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError> {
        if !self.only_on_explode || input["explode"] == json!(true) {
            panic!("scoring model exploded");
        }
        Ok(MockScorer::expected(input))
    }
}

// ============================================================================
// FAULT-INJECTING DEPENDENCIES
// ============================================================================

/// How a flaky dependency should misbehave.
#[derive(Debug, Default)]
struct Faults {
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl Faults {
    async fn enter(&self, dependency: &str) -> BallastResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DependencyError::unreachable(dependency, "injected fault").into());
        }
        Ok(())
    }
}

/// In-memory cache backend with switchable failure and hang modes.
#[derive(Debug, Default)]
pub struct FlakyCacheBackend {
    inner: InMemoryCacheBackend,
    faults: Faults,
}

impl FlakyCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call returns a dependency error while set.
    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Every call sleeps for an hour while set.
    pub fn set_hanging(&self, hanging: bool) {
        self.faults.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Backend calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CacheBackend for FlakyCacheBackend {
    async fn get(&self, key: &str) -> BallastResult<Option<BackendEntry>> {
        self.faults.enter(CACHE_DEPENDENCY).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> BallastResult<()> {
        self.faults.enter(CACHE_DEPENDENCY).await?;
        self.inner.set(key, payload, ttl).await
    }

    async fn remaining_ttl(&self, key: &str) -> BallastResult<Option<Duration>> {
        self.faults.enter(CACHE_DEPENDENCY).await?;
        self.inner.remaining_ttl(key).await
    }
}

/// In-memory durable store with switchable failure and hang modes.
#[derive(Debug, Default)]
pub struct FlakyDurableStore {
    inner: InMemoryDurableStore,
    faults: Faults,
    stores: AtomicUsize,
}

impl FlakyDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.faults.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Calls received (fetch and store), including failed ones.
    pub fn calls(&self) -> usize {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// Successful `store` calls.
    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Seed a record directly, bypassing fault injection.
    pub async fn seed(&self, fingerprint: &Fingerprint, record: StoredScore) {
        let _ = self.inner.store(fingerprint, record).await;
    }
}

#[async_trait]
impl DurableStore for FlakyDurableStore {
    async fn fetch(&self, fingerprint: &Fingerprint) -> BallastResult<Option<StoredScore>> {
        self.faults.enter(STORE_DEPENDENCY).await?;
        self.inner.fetch(fingerprint).await
    }

    async fn store(&self, fingerprint: &Fingerprint, record: StoredScore) -> BallastResult<()> {
        self.faults.enter(STORE_DEPENDENCY).await?;
        self.inner.store(fingerprint, record).await?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics sink that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Events with the given exported name.
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    /// Sources reported by `source_used`, in order.
    pub fn sources(&self) -> Vec<SourceKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::SourceUsed { source } => Some(source),
                _ => None,
            })
            .collect()
    }

    /// `(from, to)` pairs reported for `dependency`.
    pub fn transitions(&self, dependency: &str) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::BreakerTransition {
                    dependency: d,
                    from,
                    to,
                } if d == dependency => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Ballast inputs.

    use super::*;
    use proptest::prelude::*;

    /// Scalar JSON leaves. Floats are kept finite.
    pub fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Nested JSON values up to a small depth.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Non-null object payloads accepted by request validation.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,8}", arb_json(), 1..8)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    /// Request class names.
    pub fn arb_class() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    pub fn arb_version() -> impl Strategy<Value = ArtifactVersion> {
        (1u64..1_000_000).prop_map(ArtifactVersion::new)
    }

    pub fn arb_request() -> impl Strategy<Value = ScoreRequest> {
        (arb_class(), arb_payload())
            .prop_map(|(class, payload)| ScoreRequest::new(payload).with_class(class))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made configs and requests.

    use super::*;

    /// Small, fast config: pool 2, queue 2, short breaker windows.
    pub fn test_config() -> BallastConfig {
        BallastConfig::default()
            .with_pool(2, 2)
            .with_cache_ttl(Duration::from_secs(60))
            .with_breaker(CACHE_DEPENDENCY, BreakerConfig::new(3, Duration::from_secs(5)))
            .with_breaker(STORE_DEPENDENCY, BreakerConfig::new(3, Duration::from_secs(5)))
    }

    /// Numeric payload whose [`MockScorer`] output is `{"score": n + 1}`.
    pub fn payload(n: i64) -> Value {
        json!({ "feature_a": n, "feature_b": 1 })
    }

    pub fn request(n: i64) -> ScoreRequest {
        ScoreRequest::new(payload(n))
    }

    pub fn stored(version: u64, score: f64) -> StoredScore {
        StoredScore::new(
            ArtifactVersion::new(version),
            ScoreOutput::new(json!({ "score": score })),
        )
    }
}
