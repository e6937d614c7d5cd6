//! Three-state circuit breaker guarding one dependency.
//!
//! ```text
//! Closed   --(threshold consecutive failures)--> Open
//! Open     --(open_duration elapsed, next call)--> HalfOpen (that call is the probe)
//! HalfOpen --(probe succeeds)--> Closed
//! HalfOpen --(probe fails)--> Open (timer restarted)
//! ```
//!
//! Only one probe may be outstanding in HalfOpen. Every other call during that
//! window is rejected exactly as if the breaker were Open.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ballast_core::{BreakerConfig, CircuitState, MetricEvent, MetricsSink, NoopMetricsSink};
use tokio::time::Instant;

use crate::error::CallError;

/// Point-in-time view of a breaker, for health and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration: Duration,
    /// Time since the last state transition.
    pub since_transition: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    probe_in_flight: bool,
    /// Bumped on every transition so late outcomes from an earlier state are ignored.
    generation: u64,
}

/// Circuit breaker for one external dependency.
///
/// Construct one per dependency at startup and share it by `Arc`.
pub struct DependencyBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn MetricsSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    Release,
}

/// Admission ticket for a single dependency call.
///
/// Report the outcome with [`CallPermit::success`] or [`CallPermit::failure`].
/// Dropping the permit without a verdict releases it without counting either
/// way; for a probe this lets the next caller probe again.
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct CallPermit<'a> {
    breaker: &'a DependencyBreaker,
    kind: PermitKind,
    generation: u64,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the HalfOpen probe.
    pub fn is_probe(&self) -> bool {
        self.kind == PermitKind::Probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.settle(self.kind, self.generation, Verdict::Success);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.settle(self.kind, self.generation, Verdict::Failure);
    }

    /// Give the permit back without judging the dependency.
    pub fn release(mut self) {
        self.resolved = true;
        self.breaker.settle(self.kind, self.generation, Verdict::Release);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.settle(self.kind, self.generation, Verdict::Release);
        }
    }
}

impl DependencyBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                probe_in_flight: false,
                generation: 0,
            }),
            sink: Arc::new(NoopMetricsSink),
        }
    }

    /// Emit `breaker_transition` events to `sink`.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current stored state. Does not advance Open to HalfOpen; only a call does.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            open_duration: self.config.open_duration,
            since_transition: inner.last_transition.elapsed(),
        }
    }

    /// Ask to make a call. Returns `None` when the call must be short-circuited.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut transition = None;
        let admitted = {
            let mut inner = self.lock();
            let kind = match inner.state {
                CircuitState::Closed => Some(PermitKind::Normal),
                CircuitState::Open => {
                    if inner.last_transition.elapsed() >= self.config.open_duration {
                        transition = Some(Self::transition(&mut inner, CircuitState::HalfOpen));
                        inner.probe_in_flight = true;
                        Some(PermitKind::Probe)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        None
                    } else {
                        inner.probe_in_flight = true;
                        Some(PermitKind::Probe)
                    }
                }
            };
            kind.map(|kind| (kind, inner.generation))
        };

        if let Some((from, to)) = transition {
            self.announce(from, to);
        }

        admitted.map(|(kind, generation)| CallPermit {
            breaker: self,
            kind,
            generation,
            resolved: false,
        })
    }

    /// Run `f` through the breaker.
    ///
    /// Returns `CallError::Open` without invoking `f` when the breaker rejects
    /// the call. Any `Err` from `f` counts as a dependency failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or_else(|| self.open_error())?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CallError::Failed(e))
            }
        }
    }

    /// Like [`DependencyBreaker::call`] but gives up after `deadline`.
    ///
    /// A missed deadline is the caller's problem, not evidence that the
    /// dependency is unhealthy, so it releases the permit without counting.
    pub async fn call_with_deadline<F, Fut, T, E>(
        &self,
        deadline: Duration,
        f: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or_else(|| self.open_error())?;
        match tokio::time::timeout(deadline, f()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure();
                Err(CallError::Failed(e))
            }
            Err(_) => {
                permit.release();
                tracing::debug!(
                    dependency = %self.dependency,
                    deadline_ms = deadline.as_millis() as u64,
                    "Dependency call exceeded caller deadline"
                );
                Err(CallError::DeadlineExceeded {
                    dependency: self.dependency.clone(),
                    after: deadline,
                })
            }
        }
    }

    fn open_error<E>(&self) -> CallError<E> {
        CallError::Open {
            dependency: self.dependency.clone(),
        }
    }

    fn settle(&self, kind: PermitKind, generation: u64, verdict: Verdict) {
        let transition = {
            let mut inner = self.lock();
            match kind {
                PermitKind::Probe => {
                    inner.probe_in_flight = false;
                    if inner.generation != generation || inner.state != CircuitState::HalfOpen {
                        None
                    } else {
                        match verdict {
                            Verdict::Success => {
                                Some(Self::transition(&mut inner, CircuitState::Closed))
                            }
                            Verdict::Failure => {
                                Some(Self::transition(&mut inner, CircuitState::Open))
                            }
                            Verdict::Release => None,
                        }
                    }
                }
                PermitKind::Normal => {
                    if inner.generation != generation || inner.state != CircuitState::Closed {
                        None
                    } else {
                        match verdict {
                            Verdict::Success => {
                                inner.consecutive_failures = 0;
                                None
                            }
                            Verdict::Failure => {
                                inner.consecutive_failures += 1;
                                if inner.consecutive_failures >= self.config.failure_threshold {
                                    Some(Self::transition(&mut inner, CircuitState::Open))
                                } else {
                                    None
                                }
                            }
                            Verdict::Release => None,
                        }
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.announce(from, to);
        }
    }

    /// The only place state changes. Returns `(from, to)` for announcement.
    fn transition(inner: &mut BreakerInner, to: CircuitState) -> (CircuitState, CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Instant::now();
        inner.generation = inner.generation.wrapping_add(1);
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        (from, to)
    }

    fn announce(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => tracing::warn!(
                dependency = %self.dependency,
                from = %from,
                open_for_ms = self.config.open_duration.as_millis() as u64,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                dependency = %self.dependency,
                "Circuit half-open, probing dependency"
            ),
            CircuitState::Closed => tracing::info!(
                dependency = %self.dependency,
                from = %from,
                "Circuit closed"
            ),
        }
        self.sink.record(MetricEvent::BreakerTransition {
            dependency: self.dependency.clone(),
            from,
            to,
        });
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State updates are single assignments, so a poisoned guard is still coherent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DependencyBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DependencyBreaker")
            .field("dependency", &self.dependency)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("probe_in_flight", &inner.probe_in_flight)
            .finish()
    }
}
