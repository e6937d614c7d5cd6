//! Errors produced by a breaker-wrapped call.

use ballast_core::{BallastError, TimeoutPhase};
use std::time::Duration;
use thiserror::Error;

/// Outcome of [`crate::DependencyBreaker::call`] when it does not succeed.
///
/// Generic over the wrapped call's error so the breaker never needs to know
/// what the dependency does, only whether it failed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call without invoking the dependency.
    #[error("circuit open for {dependency}")]
    Open { dependency: String },

    /// The caller's deadline passed first. Not counted as a failure.
    #[error("deadline of {after:?} exceeded calling {dependency}")]
    DeadlineExceeded { dependency: String, after: Duration },

    /// The dependency was invoked and returned an error.
    #[error(transparent)]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open { .. })
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, CallError::DeadlineExceeded { .. })
    }

    /// The dependency's own error, if it got that far.
    pub fn into_failure(self) -> Option<E> {
        match self {
            CallError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CallError<BallastError>> for BallastError {
    fn from(err: CallError<BallastError>) -> Self {
        match err {
            CallError::Open { dependency } => BallastError::DependencyUnavailable { dependency },
            CallError::DeadlineExceeded { after, .. } => BallastError::Timeout {
                phase: TimeoutPhase::Resolve,
                after,
            },
            CallError::Failed(e) => e,
        }
    }
}
