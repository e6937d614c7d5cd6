//! Ballast Storage - Cache Coherence and Backends
//!
//! The version-coherent look-aside cache ([`CoherentCache`]), the cache
//! backends it can sit on, and an in-memory durable store.

pub mod cache;
pub mod store;

pub use cache::{
    early_miss_probability, ArtifactVersions, BackendEntry, CacheBackend, CacheConfig,
    CacheLookup, CacheStats, CoherentCache, InMemoryCacheBackend, LmdbCacheBackend,
    LmdbCacheError, MissReason, StampedeGuard, VersionPin, VersionedKey,
};
pub use store::InMemoryDurableStore;
