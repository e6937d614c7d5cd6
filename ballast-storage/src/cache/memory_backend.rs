//! In-process cache backend.
//!
//! Expiry runs on the tokio clock so tests can pause and advance time.
//! Expired entries are dropped lazily on access or by [`InMemoryCacheBackend::purge_expired`].

use std::time::Duration;

use async_trait::async_trait;
use ballast_core::BallastResult;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::{BackendEntry, CacheBackend};

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let remaining = self.expires_at.saturating_duration_since(now);
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// `DashMap`-backed cache backend with per-entry TTL.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, MemoryEntry>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.remaining(now).is_some();
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    fn live(&self, key: &str) -> Option<(Vec<u8>, Duration)> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.remaining(now), entry.payload.clone()));
        match found {
            Some((Some(remaining), payload)) => Some((payload, remaining)),
            Some((None, _)) => {
                self.entries
                    .remove_if(key, |_, entry| entry.remaining(now).is_none());
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> BallastResult<Option<BackendEntry>> {
        Ok(self.live(key).map(|(payload, remaining_ttl)| BackendEntry {
            payload,
            remaining_ttl,
        }))
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> BallastResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> BallastResult<Option<Duration>> {
        Ok(self.live(key).map(|(_, remaining)| remaining))
    }
}
