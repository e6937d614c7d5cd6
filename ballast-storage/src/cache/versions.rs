//! Active artifact version and in-flight version pins.
//!
//! Exactly one version is active at any instant. A request pins the active
//! version once, at the start, and uses that pin for every cache and store
//! access it makes. Activating a new version therefore never changes the
//! version an in-flight request sees; the prior version is remembered only
//! until its last pin is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ballast_core::{ArtifactVersion, ValidationError};

#[derive(Debug)]
struct VersionsInner {
    active: ArtifactVersion,
    /// Outstanding pins per version. Entries at zero are removed.
    pins: BTreeMap<ArtifactVersion, usize>,
}

impl VersionsInner {
    fn release(&mut self, version: ArtifactVersion) {
        if let Some(count) = self.pins.get_mut(&version) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pins.remove(&version);
            }
        }
    }
}

/// Shared handle to the active artifact version. Clones share state.
#[derive(Debug, Clone)]
pub struct ArtifactVersions {
    inner: Arc<Mutex<VersionsInner>>,
}

/// Keeps one artifact version in use for the lifetime of a request.
#[derive(Debug)]
pub struct VersionPin {
    version: ArtifactVersion,
    inner: Arc<Mutex<VersionsInner>>,
}

impl VersionPin {
    pub fn version(&self) -> ArtifactVersion {
        self.version
    }
}

impl Drop for VersionPin {
    fn drop(&mut self) {
        lock(&self.inner).release(self.version);
    }
}

impl ArtifactVersions {
    pub fn new(initial: ArtifactVersion) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VersionsInner {
                active: initial,
                pins: BTreeMap::new(),
            })),
        }
    }

    pub fn active(&self) -> ArtifactVersion {
        lock(&self.inner).active
    }

    /// Pin the currently active version.
    pub fn pin(&self) -> VersionPin {
        let mut inner = lock(&self.inner);
        let version = inner.active;
        *inner.pins.entry(version).or_insert(0) += 1;
        VersionPin {
            version,
            inner: self.inner.clone(),
        }
    }

    /// Make `next` the active version. Returns the version it replaced.
    ///
    /// Versions only move forward; re-activating the current version or an
    /// older one is rejected.
    pub fn activate(&self, next: ArtifactVersion) -> Result<ArtifactVersion, ValidationError> {
        let mut inner = lock(&self.inner);
        if next <= inner.active {
            return Err(ValidationError::VersionNotMonotonic {
                requested: next.get(),
                active: inner.active.get(),
            });
        }
        let previous = inner.active;
        inner.active = next;
        drop(inner);

        tracing::info!(
            previous = %previous,
            active = %next,
            "Artifact version activated"
        );
        Ok(previous)
    }

    /// Prior versions that still have requests in flight, with their pin counts.
    pub fn draining(&self) -> Vec<(ArtifactVersion, usize)> {
        let inner = lock(&self.inner);
        inner
            .pins
            .iter()
            .filter(|(version, _)| **version != inner.active)
            .map(|(version, count)| (*version, *count))
            .collect()
    }

    /// Outstanding pins on `version`.
    pub fn pinned(&self, version: ArtifactVersion) -> usize {
        lock(&self.inner).pins.get(&version).copied().unwrap_or(0)
    }
}

fn lock(inner: &Mutex<VersionsInner>) -> MutexGuard<'_, VersionsInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
