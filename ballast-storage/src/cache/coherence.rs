//! Version-coherent look-aside cache.
//!
//! Every read and write addresses `{version}:{fingerprint}`. `get` uses the
//! active version; callers that pinned a version use `get_at` / `put_at` so a
//! version swap mid-request cannot split one request across two versions.
//!
//! The cache never fails a read. Backend errors, an open cache breaker and
//! undecodable entries are all reported as misses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ballast_breaker::{CallError, DependencyBreaker};
use ballast_core::{
    ArtifactVersion, BallastConfig, BallastError, BallastResult, DependencyError, Fingerprint,
    ScoreOutput, CACHE_DEPENDENCY,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stampede::StampedeGuard;
use super::traits::{CacheBackend, CacheStats};
use super::versioned_key::VersionedKey;
use super::versions::ArtifactVersions;

/// Configuration for the coherent cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL applied by `put` when the caller passes none.
    pub default_ttl: Duration,
    /// Final fraction of an entry's TTL in which early refresh may trigger.
    pub stampede_guard_fraction: f64,
    /// Deadline for a single backend call.
    pub backend_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_ballast(&BallastConfig::default())
    }
}

impl CacheConfig {
    pub fn from_ballast(config: &BallastConfig) -> Self {
        Self {
            default_ttl: config.cache_ttl,
            stampede_guard_fraction: config.stampede_guard_fraction,
            backend_timeout: config.resolve_timeout,
        }
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the stampede guard fraction.
    pub fn with_guard_fraction(mut self, fraction: f64) -> Self {
        self.stampede_guard_fraction = fraction;
        self
    }

    /// Set the backend call deadline.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }
}

/// What is actually stored in the backend for one entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// TTL the entry was written with, needed for the stampede window.
    original_ttl_ms: u64,
    written_at: DateTime<Utc>,
    output: ScoreOutput,
}

/// Why a lookup did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No live entry under the key.
    Absent,
    /// The entry is live but this reader was chosen to refresh it early.
    EarlyRefresh,
    /// Backend failed, timed out, or its breaker is open.
    Unavailable,
    /// The stored bytes could not be decoded.
    Corrupt,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit {
        output: ScoreOutput,
        remaining_ttl: Duration,
    },
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }

    pub fn into_output(self) -> Option<ScoreOutput> {
        match self {
            CacheLookup::Hit { output, .. } => Some(output),
            CacheLookup::Miss(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    early_refreshes: AtomicU64,
    backend_errors: AtomicU64,
}

/// Look-aside cache keyed by artifact version and fingerprint.
pub struct CoherentCache {
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<DependencyBreaker>,
    versions: ArtifactVersions,
    guard: StampedeGuard,
    config: CacheConfig,
    counters: Counters,
}

impl CoherentCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        breaker: Arc<DependencyBreaker>,
        versions: ArtifactVersions,
        config: CacheConfig,
    ) -> Self {
        let guard = StampedeGuard::new(config.stampede_guard_fraction);
        Self::with_guard(backend, breaker, versions, config, guard)
    }

    /// Use a specific stampede guard, e.g. a seeded one in tests.
    pub fn with_guard(
        backend: Arc<dyn CacheBackend>,
        breaker: Arc<DependencyBreaker>,
        versions: ArtifactVersions,
        config: CacheConfig,
        guard: StampedeGuard,
    ) -> Self {
        Self {
            backend,
            breaker,
            versions,
            guard,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn versions(&self) -> &ArtifactVersions {
        &self.versions
    }

    pub fn breaker(&self) -> &Arc<DependencyBreaker> {
        &self.breaker
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            early_refreshes: self.counters.early_refreshes.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
        }
    }

    /// Look up `fingerprint` under the active version.
    pub async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup {
        let version = self.versions.active();
        self.get_at(version, fingerprint).await
    }

    /// Look up `fingerprint` under an explicit version.
    pub async fn get_at(&self, version: ArtifactVersion, fingerprint: &Fingerprint) -> CacheLookup {
        let key = VersionedKey::new(version, fingerprint.clone()).encode();
        let backend = &self.backend;

        let entry = match self
            .breaker
            .call_with_deadline(self.config.backend_timeout, || backend.get(&key))
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.miss(MissReason::Absent),
            Err(e) => {
                self.note_backend_error(&key, &e);
                return self.miss(MissReason::Unavailable);
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&entry.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                return self.miss(MissReason::Corrupt);
            }
        };

        let original = Duration::from_millis(envelope.original_ttl_ms);
        if self.guard.should_refresh(entry.remaining_ttl, original) {
            self.counters.early_refreshes.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                key = %key,
                remaining_ms = entry.remaining_ttl.as_millis() as u64,
                "Early refresh of cache entry"
            );
            return self.miss(MissReason::EarlyRefresh);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Hit {
            output: envelope.output,
            remaining_ttl: entry.remaining_ttl,
        }
    }

    /// Write under the active version.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        output: &ScoreOutput,
        ttl: Option<Duration>,
    ) -> BallastResult<()> {
        let version = self.versions.active();
        self.put_at(version, fingerprint, output, ttl).await
    }

    /// Write under an explicit version. `ttl` defaults to the configured TTL.
    pub async fn put_at(
        &self,
        version: ArtifactVersion,
        fingerprint: &Fingerprint,
        output: &ScoreOutput,
        ttl: Option<Duration>,
    ) -> BallastResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Ok(());
        }

        let key = VersionedKey::new(version, fingerprint.clone()).encode();
        let payload = serde_json::to_vec(&Envelope {
            original_ttl_ms: ttl.as_millis() as u64,
            written_at: Utc::now(),
            output: output.clone(),
        })
        .map_err(|e| DependencyError::serialization(CACHE_DEPENDENCY, e.to_string()))?;

        let backend = &self.backend;
        let result = self
            .breaker
            .call_with_deadline(self.config.backend_timeout, || {
                backend.set(&key, payload, ttl)
            })
            .await;

        if let Err(e) = &result {
            self.note_backend_error(&key, e);
        }
        result.map_err(BallastError::from)
    }

    fn miss(&self, reason: MissReason) -> CacheLookup {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Miss(reason)
    }

    fn note_backend_error(&self, key: &str, error: &CallError<BallastError>) {
        match error {
            CallError::Open { .. } => {
                tracing::trace!(key = %key, "Cache breaker open, skipping backend");
            }
            CallError::DeadlineExceeded { after, .. } => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %key,
                    after_ms = after.as_millis() as u64,
                    "Cache backend call timed out"
                );
            }
            CallError::Failed(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Cache backend call failed");
            }
        }
    }
}
