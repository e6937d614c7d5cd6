//! In-memory durable store.
//!
//! Stands in for a real database client in the binary and in tests. Records
//! keep the artifact version that produced them; filtering by version is the
//! caller's job.

use async_trait::async_trait;
use ballast_core::{BallastResult, DurableStore, Fingerprint, StoredScore};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    records: DashMap<Fingerprint, StoredScore>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn fetch(&self, fingerprint: &Fingerprint) -> BallastResult<Option<StoredScore>> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    async fn store(&self, fingerprint: &Fingerprint, record: StoredScore) -> BallastResult<()> {
        self.records.insert(fingerprint.clone(), record);
        Ok(())
    }
}
