//! External collaborator traits.
//!
//! The core calls out to a scoring function and a durable store through these
//! narrow interfaces. Implementations are supplied by the enclosing service;
//! `ballast-storage` ships in-memory versions and `ballast-test-utils` ships
//! fault-injecting ones.

use async_trait::async_trait;
use serde_json::Value;

use crate::{BallastResult, Fingerprint, ScoreOutput, ScoringError, StoredScore};

/// Synchronous, potentially CPU-heavy scoring function.
///
/// Called only from the arbiter's worker threads, never from an async task.
pub trait Scorer: Send + Sync + 'static {
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError>;
}

impl<F> Scorer for F
where
    F: Fn(&Value) -> Result<ScoreOutput, ScoringError> + Send + Sync + 'static,
{
    fn score(&self, input: &Value) -> Result<ScoreOutput, ScoringError> {
        self(input)
    }
}

/// Durable store client.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the last stored score for a fingerprint, if any.
    async fn fetch(&self, fingerprint: &Fingerprint) -> BallastResult<Option<StoredScore>>;

    /// Persist a score. Overwrites any previous record for the fingerprint.
    async fn store(&self, fingerprint: &Fingerprint, record: StoredScore) -> BallastResult<()>;
}
