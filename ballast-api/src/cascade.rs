//! Fallback cascade: cache, then durable store, then the static default.
//!
//! Sources are consulted in order and the first value wins. A source with a
//! breaker is only called through it, so an open breaker skips the source
//! without touching the dependency. The static default is never gated and is
//! only used when every source was unavailable. If at least one source
//! answered cleanly with "absent" the cascade reports
//! [`Resolution::Unresolved`] and the caller computes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ballast_breaker::DependencyBreaker;
use ballast_core::{
    ArtifactVersion, BallastError, BallastResult, DurableStore, Fingerprint, MetricEvent,
    MetricsSink, ScoreOutput, SourceKind, TimeoutPhase,
};
use ballast_storage::{ArtifactVersions, CacheLookup, CoherentCache, MissReason};

// ============================================================================
// SOURCES
// ============================================================================

/// One tier of the cascade.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// `Ok(None)` means the source answered and has nothing for this key.
    async fn fetch(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
    ) -> BallastResult<Option<ScoreOutput>>;
}

/// Cache tier. The cache guards itself with its own breaker and reports
/// backend trouble as a miss; this tier turns that particular miss back into
/// `DependencyUnavailable` so the cascade can tell an outage from an absence.
pub struct CacheSource {
    cache: Arc<CoherentCache>,
}

impl CacheSource {
    pub fn new(cache: Arc<CoherentCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FallbackSource for CacheSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Cache
    }

    async fn fetch(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
    ) -> BallastResult<Option<ScoreOutput>> {
        match self.cache.get_at(version, fingerprint).await {
            CacheLookup::Miss(MissReason::Unavailable) => Err(BallastError::DependencyUnavailable {
                dependency: self.cache.breaker().dependency().to_string(),
            }),
            lookup => Ok(lookup.into_output()),
        }
    }
}

/// Durable store tier. Records written by another artifact version are
/// treated as absent.
pub struct StoreSource {
    store: Arc<dyn DurableStore>,
}

impl StoreSource {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FallbackSource for StoreSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DurableStore
    }

    async fn fetch(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
    ) -> BallastResult<Option<ScoreOutput>> {
        match self.store.fetch(fingerprint).await? {
            Some(record) if record.version == version => Ok(Some(record.output)),
            Some(record) => {
                tracing::trace!(
                    fingerprint = %fingerprint,
                    stored_version = %record.version,
                    active_version = %version,
                    "Ignoring stored score from another version"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// CASCADE
// ============================================================================

/// Outcome of [`FallbackCascade::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A source returned a value.
    Found {
        value: ScoreOutput,
        source: SourceKind,
    },
    /// No value, and at least one source answered that it has none.
    Unresolved,
    /// No value, and every source was unavailable.
    Degraded { value: ScoreOutput },
}

impl Resolution {
    pub fn source(&self) -> Option<SourceKind> {
        match self {
            Resolution::Found { source, .. } => Some(*source),
            Resolution::Degraded { .. } => Some(SourceKind::StaticDefault),
            Resolution::Unresolved => None,
        }
    }
}

struct Tier {
    source: Arc<dyn FallbackSource>,
    breaker: Option<Arc<DependencyBreaker>>,
}

/// Ordered list of sources for one request class.
pub struct FallbackCascade {
    class: String,
    tiers: Vec<Tier>,
    versions: ArtifactVersions,
    static_default: Arc<ScoreOutput>,
    resolve_timeout: Duration,
    sink: Arc<dyn MetricsSink>,
}

impl FallbackCascade {
    pub fn new(
        class: impl Into<String>,
        versions: ArtifactVersions,
        static_default: Arc<ScoreOutput>,
        resolve_timeout: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            class: class.into(),
            tiers: Vec::new(),
            versions,
            static_default,
            resolve_timeout,
            sink,
        }
    }

    /// Append a source. `breaker` gates every call to it when present.
    pub fn with_source(
        mut self,
        source: Arc<dyn FallbackSource>,
        breaker: Option<Arc<DependencyBreaker>>,
    ) -> Self {
        self.tiers.push(Tier { source, breaker });
        self
    }

    /// Cache first, then the durable store behind `store_breaker`.
    pub fn standard(
        class: impl Into<String>,
        cache: Arc<CoherentCache>,
        store: Arc<dyn DurableStore>,
        store_breaker: Arc<DependencyBreaker>,
        static_default: Arc<ScoreOutput>,
        resolve_timeout: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let versions = cache.versions().clone();
        Self::new(class, versions, static_default, resolve_timeout, sink)
            .with_source(Arc::new(CacheSource::new(cache)), None)
            .with_source(Arc::new(StoreSource::new(store)), Some(store_breaker))
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn sources(&self) -> Vec<SourceKind> {
        self.tiers.iter().map(|t| t.source.kind()).collect()
    }

    pub fn static_default(&self) -> &ScoreOutput {
        &self.static_default
    }

    /// Resolve under the active artifact version.
    pub async fn resolve(&self, fingerprint: &Fingerprint) -> Resolution {
        let pin = self.versions.pin();
        self.resolve_at(pin.version(), fingerprint).await
    }

    /// Resolve under an explicit version, normally one the caller has pinned.
    pub async fn resolve_at(&self, version: ArtifactVersion, fingerprint: &Fingerprint) -> Resolution {
        let mut answered = false;
        let mut unavailable = false;

        for tier in &self.tiers {
            let kind = tier.source.kind();
            match self.consult(tier, version, fingerprint).await {
                Ok(Some(value)) => {
                    self.sink.record(MetricEvent::SourceUsed { source: kind });
                    tracing::debug!(
                        class = %self.class,
                        fingerprint = %fingerprint,
                        source = %kind,
                        "Resolved from fallback source"
                    );
                    return Resolution::Found { value, source: kind };
                }
                Ok(None) => answered = true,
                Err(BallastError::DependencyUnavailable { dependency }) => {
                    unavailable = true;
                    tracing::debug!(source = %kind, dependency = %dependency, "Skipping source, breaker open");
                }
                Err(e) => {
                    unavailable = true;
                    tracing::warn!(source = %kind, error = %e, "Fallback source failed");
                }
            }
        }

        // One clean "absent" is enough to compute; only a total outage degrades.
        if answered || !unavailable {
            return Resolution::Unresolved;
        }

        self.sink.record(MetricEvent::SourceUsed {
            source: SourceKind::StaticDefault,
        });
        tracing::info!(
            class = %self.class,
            fingerprint = %fingerprint,
            "Serving static default"
        );
        Resolution::Degraded {
            value: self.static_default.as_ref().clone(),
        }
    }

    async fn consult(
        &self,
        tier: &Tier,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
    ) -> BallastResult<Option<ScoreOutput>> {
        let source = &tier.source;
        match &tier.breaker {
            Some(breaker) => breaker
                .call_with_deadline(self.resolve_timeout, || source.fetch(version, fingerprint))
                .await
                .map_err(BallastError::from),
            None => tokio::time::timeout(self.resolve_timeout, source.fetch(version, fingerprint))
                .await
                .map_err(|_| BallastError::Timeout {
                    phase: TimeoutPhase::Resolve,
                    after: self.resolve_timeout,
                })?,
        }
    }
}

impl std::fmt::Debug for FallbackCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCascade")
            .field("class", &self.class)
            .field("sources", &self.sources())
            .field("resolve_timeout", &self.resolve_timeout)
            .finish()
    }
}
