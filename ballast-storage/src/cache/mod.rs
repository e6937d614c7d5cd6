//! Cache coherence layer.
//!
//! Entries are addressed by [`VersionedKey`] (`{artifact-version}:{fingerprint}`).
//! Activating a new artifact version invalidates every older entry at once,
//! without a flush, because nothing will ever ask for the old keys again.
//!
//! Near expiry, [`StampedeGuard`] turns a random subset of reads into misses so
//! that a hot entry is refreshed by a few callers instead of all of them.
//!
//! # Example
//!
//! ```ignore
//! let versions = ArtifactVersions::new(ArtifactVersion::new(1));
//! let cache = CoherentCache::new(backend, cache_breaker, versions.clone(), CacheConfig::default());
//!
//! cache.put(&fingerprint, &output, None).await?;
//! assert!(cache.get(&fingerprint).await.is_hit());
//!
//! versions.activate(ArtifactVersion::new(2))?;
//! assert!(!cache.get(&fingerprint).await.is_hit());
//! ```

pub mod coherence;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod stampede;
pub mod traits;
pub mod versioned_key;
pub mod versions;

pub use coherence::{CacheConfig, CacheLookup, CoherentCache, MissReason};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use stampede::{early_miss_probability, StampedeGuard};
pub use traits::{BackendEntry, CacheBackend, CacheStats};
pub use versioned_key::VersionedKey;
pub use versions::{ArtifactVersions, VersionPin};
