//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! persistent key-value store. Entries outlive the process, so expiry is kept
//! as a wall-clock timestamp next to the payload rather than on a monotonic
//! clock.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, i64 LE unix millis][payload]`

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ballast_core::{BallastError, BallastResult, DependencyError, CACHE_DEPENDENCY};
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{BackendEntry, CacheBackend};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for BallastError {
    fn from(e: LmdbCacheError) -> Self {
        DependencyError::operation_failed(CACHE_DEPENDENCY, e.to_string()).into()
    }
}

/// Persistent cache backend on a single unnamed LMDB database.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    /// Expired entries removed on write.
    reclaimed: AtomicU64,
}

impl LmdbCacheBackend {
    /// Open (or create) a cache at `path` with a map size of `max_size_mb`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per backend and never
        // concurrently from another process with different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            reclaimed: AtomicU64::new(0),
        })
    }

    /// Number of stored entries, live or expired.
    pub fn len(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    /// Expired entries deleted so far by `purge_expired`.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Delete every expired entry in one write transaction.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            iter.filter_map(Result::ok)
                .filter(|(_, value)| match decode_expiry(value) {
                    Ok(expires_at) => expires_at <= now,
                    Err(_) => true,
                })
                .map(|(key, _)| key.to_vec())
                .collect()
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.reclaimed.fetch_add(deleted, Ordering::Relaxed);
        Ok(deleted)
    }

    fn read(&self, key: &str) -> Result<Option<BackendEntry>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let Some(bytes) = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        else {
            return Ok(None);
        };

        let expires_at = decode_expiry(bytes)?;
        let remaining_ms = expires_at - Utc::now().timestamp_millis();
        if remaining_ms <= 0 {
            return Ok(None);
        }

        Ok(Some(BackendEntry {
            payload: bytes[HEADER_LEN..].to_vec(),
            remaining_ttl: Duration::from_millis(remaining_ms as u64),
        }))
    }
}

fn decode_expiry(bytes: &[u8]) -> Result<i64, LmdbCacheError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| LmdbCacheError::Corrupt(format!("{} byte value", bytes.len())))?;
    Ok(i64::from_le_bytes(header))
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> BallastResult<Option<BackendEntry>> {
        Ok(self.read(key)?)
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> BallastResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut value = Vec::with_capacity(HEADER_LEN + payload.len());
        value.extend_from_slice(&expires_at.to_le_bytes());
        value.extend_from_slice(&payload);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &value)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> BallastResult<Option<Duration>> {
        Ok(self.read(key)?.map(|entry| entry.remaining_ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LmdbCacheBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LmdbCacheBackend::new(dir.path(), 16).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_dir, backend) = backend();
        backend
            .set("1:abc", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let entry = backend.get("1:abc").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"payload");
        assert!(entry.remaining_ttl > Duration::from_secs(55));
        assert!(entry.remaining_ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (_dir, backend) = backend();
        assert!(backend.get("nope").await.unwrap().is_none());
        assert!(backend.remaining_ttl("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned_and_is_purged() {
        let (_dir, backend) = backend();
        backend
            .set("gone", vec![1, 2, 3], Duration::from_millis(1))
            .await
            .unwrap();
        backend
            .set("kept", vec![4], Duration::from_secs(60))
            .await
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(backend.get("gone").await.unwrap().is_none());
        assert_eq!(backend.len().unwrap(), 2);
        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert_eq!(backend.len().unwrap(), 1);
        assert_eq!(backend.reclaimed(), 1);
    }

    #[tokio::test]
    async fn test_entries_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = LmdbCacheBackend::new(dir.path(), 16).unwrap();
            backend
                .set("3:fp", b"v".to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let reopened = LmdbCacheBackend::new(dir.path(), 16).unwrap();
        assert_eq!(reopened.get("3:fp").await.unwrap().unwrap().payload, b"v");
    }
}
