//! Cache backend trait and cache statistics.
//!
//! A backend is a plain byte store with per-entry TTL. Versioning, envelope
//! encoding and stampede suppression all live above it in
//! [`super::coherence::CoherentCache`], so any key-value store with expiry can
//! be plugged in.

use std::time::Duration;

use async_trait::async_trait;
use ballast_core::BallastResult;

/// A live entry as returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEntry {
    /// Bytes exactly as passed to [`CacheBackend::set`].
    pub payload: Vec<u8>,
    /// Time left before the entry expires. Always non-zero for a live entry.
    pub remaining_ttl: Duration,
}

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be safe for concurrent use and must never return an
/// expired entry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live entry and its remaining TTL in one read.
    async fn get(&self, key: &str) -> BallastResult<Option<BackendEntry>>;

    /// Write or overwrite an entry that expires after `ttl`.
    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> BallastResult<()>;

    /// Remaining TTL of a live entry, or `None` if absent or expired.
    async fn remaining_ttl(&self, key: &str) -> BallastResult<Option<Duration>>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups reported as a miss, for any reason.
    pub misses: u64,
    /// Misses deliberately reported for an entry that was still live.
    pub early_refreshes: u64,
    /// Backend failures that were turned into misses or dropped writes.
    pub backend_errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
