//! Request arbiter.
//!
//! `Arbiter::handle` is the only entry point into the scoring core:
//!
//! 1. validate the request and pick the cascade for its class
//! 2. fingerprint the payload and pin the active artifact version
//! 3. resolve through the cascade (cache, durable store, static default)
//! 4. on a clean miss, hand the payload to the [`ScoringPool`] and await it
//! 5. write fresh results back to the cache and durable store
//!
//! The async task handling a request never runs the scorer itself. It awaits
//! the cascade and then, at most once, the pool.

pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ballast_breaker::{BreakerRegistry, DependencyBreaker};
use ballast_core::{
    ArtifactVersion, BallastConfig, BallastError, BallastResult, ConfigError, DurableStore,
    Fingerprint, HealthCheck, MetricEvent, MetricsSink, NoopMetricsSink, ScoreOutput,
    ScoreRequest, Scorer, SourceKind, StoredScore, TimeoutPhase, ValidationError,
    CACHE_DEPENDENCY, STORE_DEPENDENCY,
};
use ballast_storage::{
    ArtifactVersions, CacheBackend, CacheConfig, CoherentCache, InMemoryCacheBackend,
    InMemoryDurableStore, StampedeGuard,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cascade::{FallbackCascade, Resolution};
pub use pool::{ScoringPool, POOL_DEPENDENCY};

/// Successful answer to a scoring request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub request_id: Uuid,
    pub output: ScoreOutput,
    pub source: SourceKind,
    pub artifact_version: ArtifactVersion,
    pub fingerprint: Fingerprint,
    /// True when the static default was served.
    pub degraded: bool,
    pub served_at: DateTime<Utc>,
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles an [`Arbiter`] from config and collaborators.
///
/// Only the scorer is required. The cache backend and durable store default
/// to the in-memory implementations and metrics default to a no-op sink.
pub struct ArbiterBuilder {
    config: BallastConfig,
    scorer: Option<Arc<dyn Scorer>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    store: Option<Arc<dyn DurableStore>>,
    sink: Option<Arc<dyn MetricsSink>>,
    guard: Option<StampedeGuard>,
}

impl ArbiterBuilder {
    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the cache's stampede guard, e.g. with a seeded one.
    pub fn stampede_guard(mut self, guard: StampedeGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn build(self) -> BallastResult<Arbiter> {
        let config = self.config;
        config.validate()?;

        let scorer = self.scorer.ok_or_else(|| ConfigError::MissingRequired {
            field: "scorer".to_string(),
        })?;
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(NoopMetricsSink) as Arc<dyn MetricsSink>);

        let breakers = BreakerRegistry::from_config(&config, Arc::clone(&sink));
        let cache_breaker = breakers.require(CACHE_DEPENDENCY)?;
        let store_breaker = breakers.require(STORE_DEPENDENCY)?;

        let versions = ArtifactVersions::new(ArtifactVersion::new(config.initial_artifact_version));
        let backend = self
            .cache_backend
            .unwrap_or_else(|| Arc::new(InMemoryCacheBackend::new()) as Arc<dyn CacheBackend>);
        let guard = self
            .guard
            .unwrap_or_else(|| StampedeGuard::new(config.stampede_guard_fraction));
        let cache = Arc::new(CoherentCache::with_guard(
            backend,
            cache_breaker,
            versions.clone(),
            CacheConfig::from_ballast(&config),
            guard,
        ));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryDurableStore::new()) as Arc<dyn DurableStore>);

        let static_default = Arc::new(ScoreOutput::new(config.static_default.clone()));
        let cascades: HashMap<String, FallbackCascade> = config
            .request_classes
            .iter()
            .map(|class| {
                let cascade = FallbackCascade::standard(
                    class.clone(),
                    Arc::clone(&cache),
                    Arc::clone(&store),
                    Arc::clone(&store_breaker),
                    Arc::clone(&static_default),
                    config.resolve_timeout,
                    Arc::clone(&sink),
                );
                (class.clone(), cascade)
            })
            .collect();

        let pool = ScoringPool::new(
            scorer,
            config.worker_pool_size,
            config.queue_depth,
            Arc::clone(&sink),
        )?;

        tracing::info!(
            classes = ?config.request_classes,
            artifact_version = config.initial_artifact_version,
            pool_size = pool.pool_size(),
            capacity = pool.capacity(),
            "Arbiter ready"
        );

        Ok(Arbiter {
            cascades,
            cache,
            store,
            store_breaker,
            versions,
            pool,
            breakers,
            sink,
            config,
        })
    }
}

// ============================================================================
// ARBITER
// ============================================================================

pub struct Arbiter {
    cascades: HashMap<String, FallbackCascade>,
    cache: Arc<CoherentCache>,
    store: Arc<dyn DurableStore>,
    store_breaker: Arc<DependencyBreaker>,
    versions: ArtifactVersions,
    pool: ScoringPool,
    breakers: BreakerRegistry,
    sink: Arc<dyn MetricsSink>,
    config: BallastConfig,
}

impl Arbiter {
    pub fn builder(config: BallastConfig) -> ArbiterBuilder {
        ArbiterBuilder {
            config,
            scorer: None,
            cache_backend: None,
            store: None,
            sink: None,
            guard: None,
        }
    }

    /// Answer one scoring request.
    ///
    /// Errors are limited to validation, `Timeout`, `Saturated` and
    /// `ComputationFailed`. Dependency outages degrade to the static default.
    pub async fn handle(&self, request: ScoreRequest) -> BallastResult<ScoreResponse> {
        request.validate()?;
        let cascade =
            self.cascades
                .get(&request.class)
                .ok_or_else(|| ValidationError::UnknownRequestClass {
                    class: request.class.clone(),
                })?;

        let deadline = effective_deadline(&request, &self.config);
        let started = Instant::now();
        let fingerprint = request.fingerprint();
        let pin = self.versions.pin();
        let version = pin.version();

        let resolution = tokio::time::timeout(deadline, cascade.resolve_at(version, &fingerprint))
            .await
            .map_err(|_| BallastError::Timeout {
                phase: TimeoutPhase::Resolve,
                after: deadline,
            })?;

        let (output, source) = match resolution {
            Resolution::Found { value, source } => {
                if source == SourceKind::DurableStore {
                    self.write_back_cache(version, &fingerprint, &value).await;
                }
                (value, source)
            }
            Resolution::Degraded { value } => (value, SourceKind::StaticDefault),
            Resolution::Unresolved => {
                let remaining = deadline.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(BallastError::Timeout {
                        phase: TimeoutPhase::Resolve,
                        after: deadline,
                    });
                }

                let output = self.pool.submit(request.payload, remaining).await?;
                self.sink.record(MetricEvent::SourceUsed {
                    source: SourceKind::Computed,
                });
                self.write_back_cache(version, &fingerprint, &output).await;
                self.write_back_store(version, &fingerprint, &output).await;
                (output, SourceKind::Computed)
            }
        };

        tracing::debug!(
            class = %request.class,
            fingerprint = %fingerprint,
            source = %source,
            artifact_version = %version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );

        Ok(ScoreResponse {
            request_id: Uuid::now_v7(),
            output,
            source,
            artifact_version: version,
            fingerprint,
            degraded: source.is_degraded(),
            served_at: Utc::now(),
        })
    }

    async fn write_back_cache(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
        output: &ScoreOutput,
    ) {
        if let Err(e) = self.cache.put_at(version, fingerprint, output, None).await {
            log_write_back_failure(CACHE_DEPENDENCY, &e);
        }
    }

    async fn write_back_store(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
        output: &ScoreOutput,
    ) {
        let record = StoredScore::new(version, output.clone());
        let store = &self.store;
        let result = self
            .store_breaker
            .call_with_deadline(self.config.resolve_timeout, || {
                store.store(fingerprint, record)
            })
            .await;
        if let Err(e) = result {
            log_write_back_failure(STORE_DEPENDENCY, &BallastError::from(e));
        }
    }

    /// Activate a new artifact version. Returns the previously active one.
    pub fn activate_version(&self, version: ArtifactVersion) -> BallastResult<ArtifactVersion> {
        Ok(self.versions.activate(version)?)
    }

    pub fn active_version(&self) -> ArtifactVersion {
        self.versions.active()
    }

    pub fn versions(&self) -> &ArtifactVersions {
        &self.versions
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &CoherentCache {
        &self.cache
    }

    pub fn pool(&self) -> &ScoringPool {
        &self.pool
    }

    pub fn config(&self) -> &BallastConfig {
        &self.config
    }

    pub fn request_classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.cascades.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Health of every breaker-guarded dependency plus the scoring pool.
    pub fn health(&self) -> Vec<HealthCheck> {
        let mut checks: Vec<HealthCheck> = self
            .breakers
            .snapshots()
            .into_iter()
            .map(|s| {
                HealthCheck::from_breaker(s.dependency, s.state)
                    .with_metadata("consecutive_failures", json!(s.consecutive_failures))
            })
            .collect();

        let in_flight = self.pool.in_flight();
        let capacity = self.pool.capacity();
        let pool = if in_flight >= capacity {
            HealthCheck::degraded(POOL_DEPENDENCY, "at capacity")
        } else {
            HealthCheck::healthy(POOL_DEPENDENCY)
        };
        checks.push(
            pool.with_metadata("in_flight", json!(in_flight))
                .with_metadata("capacity", json!(capacity)),
        );
        checks
    }

    /// Stop the scoring pool and join its threads. Blocks.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("classes", &self.request_classes())
            .field("active_version", &self.versions.active())
            .field("pool", &self.pool)
            .finish()
    }
}

fn log_write_back_failure(dependency: &str, e: &BallastError) {
    match e {
        BallastError::DependencyUnavailable { .. } | BallastError::Timeout { .. } => {
            tracing::debug!(dependency, error = %e, "Write-back skipped");
        }
        _ => tracing::warn!(dependency, error = %e, "Write-back failed"),
    }
}

/// Request timeout used when neither the request nor the config sets one.
pub fn effective_deadline(request: &ScoreRequest, config: &BallastConfig) -> Duration {
    request.deadline.unwrap_or(config.request_timeout)
}
