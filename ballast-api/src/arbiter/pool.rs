//! Bounded scoring pool.
//!
//! Scoring runs on dedicated OS threads, never on the async runtime. A job is
//! handed over through a bounded channel and its result comes back on a
//! oneshot, so the submitting task only ever awaits.
//!
//! Admission is counted, not inferred from channel capacity: a job holds a
//! slot from admission until its worker is done with it, so at most
//! `pool_size + queue_depth` jobs exist at any time and the next submission
//! fails with `Saturated`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ballast_core::{
    BallastError, BallastResult, DependencyError, MetricEvent, MetricsSink, ScoreOutput, Scorer,
    TimeoutPhase,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Dependency name reported when the pool has been shut down.
pub const POOL_DEPENDENCY: &str = "scoring_pool";

type JobResult = BallastResult<ScoreOutput>;

/// Capacity held by one admitted job.
struct Slot {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Job {
    input: Value,
    started: Arc<AtomicBool>,
    reply: oneshot::Sender<JobResult>,
    _slot: Slot,
}

pub struct ScoringPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<AtomicUsize>,
    pool_size: usize,
    capacity: usize,
    sink: Arc<dyn MetricsSink>,
}

impl ScoringPool {
    /// Start `pool_size` worker threads with room for `queue_depth` waiting jobs.
    pub fn new(
        scorer: Arc<dyn Scorer>,
        pool_size: usize,
        queue_depth: usize,
        sink: Arc<dyn MetricsSink>,
    ) -> BallastResult<Self> {
        let pool_size = pool_size.max(1);
        let capacity = pool_size + queue_depth;
        let (sender, receiver) = mpsc::channel::<Job>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let receiver = Arc::clone(&receiver);
            let scorer = Arc::clone(&scorer);
            let handle = std::thread::Builder::new()
                .name(format!("ballast-scorer-{}", i))
                .spawn(move || worker_loop(i, receiver, scorer))
                .map_err(|e| {
                    DependencyError::operation_failed(POOL_DEPENDENCY, format!("spawn failed: {}", e))
                })?;
            workers.push(handle);
        }

        tracing::info!(pool_size, queue_depth, "Scoring pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            in_flight: Arc::new(AtomicUsize::new(0)),
            pool_size,
            capacity,
            sink,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Jobs that may exist at once: running plus queued.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Score `input` on a worker thread, waiting at most `deadline`.
    ///
    /// Fails fast with `Saturated` when the pool is full. A deadline that
    /// expires before a worker picks the job up is `Timeout { Queued }`;
    /// one that expires while the scorer runs is `Timeout { Scoring }`.
    pub async fn submit(&self, input: Value, deadline: Duration) -> JobResult {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| BallastError::DependencyUnavailable {
                dependency: POOL_DEPENDENCY.to_string(),
            })?;

        let slot = self.admit()?;
        let started = Arc::new(AtomicBool::new(false));
        let (reply, result) = oneshot::channel();

        sender
            .try_send(Job {
                input,
                started: Arc::clone(&started),
                reply,
                _slot: slot,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => self.saturated(),
                mpsc::error::TrySendError::Closed(_) => BallastError::DependencyUnavailable {
                    dependency: POOL_DEPENDENCY.to_string(),
                },
            })?;

        match tokio::time::timeout(deadline, result).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BallastError::ComputationFailed {
                reason: "scoring worker exited before replying".to_string(),
            }),
            Err(_) => {
                let phase = if started.load(Ordering::Acquire) {
                    TimeoutPhase::Scoring
                } else {
                    TimeoutPhase::Queued
                };
                tracing::debug!(
                    phase = %phase,
                    deadline_ms = deadline.as_millis() as u64,
                    "Scoring job exceeded deadline"
                );
                Err(BallastError::Timeout {
                    phase,
                    after: deadline,
                })
            }
        }
    }

    fn admit(&self) -> BallastResult<Slot> {
        let capacity = self.capacity;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| self.saturated())?;
        Ok(Slot {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    fn saturated(&self) -> BallastError {
        let in_flight = self.in_flight();
        self.sink.record(MetricEvent::PoolSaturated {
            in_flight,
            capacity: self.capacity,
        });
        tracing::warn!(in_flight, capacity = self.capacity, "Scoring pool saturated");
        BallastError::Saturated {
            in_flight,
            capacity: self.capacity,
        }
    }

    /// Stop accepting work and join the workers once the queue drains.
    ///
    /// Blocks the calling thread; from async code run it on a blocking task.
    pub fn shutdown(&self) {
        drop(self.sender.lock().unwrap_or_else(|p| p.into_inner()).take());

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Scoring worker terminated abnormally");
            }
        }
        tracing::info!("Scoring pool stopped");
    }
}

impl Drop for ScoringPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit; they are not joined here.
        drop(self.sender.lock().unwrap_or_else(|p| p.into_inner()).take());
    }
}

impl std::fmt::Debug for ScoringPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringPool")
            .field("pool_size", &self.pool_size)
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, scorer: Arc<dyn Scorer>) {
    loop {
        let job = {
            let mut receiver = receiver.lock().unwrap_or_else(|p| p.into_inner());
            receiver.blocking_recv()
        };
        let Some(Job {
            input,
            started,
            reply,
            _slot: slot,
        }) = job
        else {
            break;
        };

        // Caller already gave up while the job was queued.
        if reply.is_closed() {
            continue;
        }

        started.store(true, Ordering::Release);
        let outcome = match catch_unwind(AssertUnwindSafe(|| scorer.score(&input))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BallastError::from(e)),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(worker = id, reason = %reason, "Scoring function panicked");
                Err(BallastError::ComputationFailed {
                    reason: format!("scoring function panicked: {}", reason),
                })
            }
        };

        // Free capacity before the caller can observe the result.
        drop(slot);
        // A closed receiver means the caller timed out mid-computation.
        let _ = reply.send(outcome);
    }
    tracing::debug!(worker = id, "Scoring worker exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::{NoopMetricsSink, ScoringError};
    use serde_json::json;

    fn doubler() -> Arc<dyn Scorer> {
        Arc::new(|input: &Value| -> Result<ScoreOutput, ScoringError> {
            let x = input["x"]
                .as_f64()
                .ok_or_else(|| ScoringError::new("x must be numeric"))?;
            if x < 0.0 {
                panic!("negative input");
            }
            Ok(ScoreOutput::new(json!(x * 2.0)))
        })
    }

    fn pool(size: usize, queue: usize) -> ScoringPool {
        ScoringPool::new(doubler(), size, queue, Arc::new(NoopMetricsSink)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_scores_on_worker() {
        let pool = pool(2, 2);
        let out = pool
            .submit(json!({"x": 2.0}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, ScoreOutput::new(json!(4.0)));
        assert_eq!(pool.capacity(), 4);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_scoring_error_is_computation_failed() {
        let pool = pool(1, 0);
        let err = pool
            .submit(json!({"x": "two"}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BallastError::ComputationFailed { .. }));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = pool(1, 0);
        let err = pool
            .submit(json!({"x": -1.0}), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BallastError::ComputationFailed { reason } => assert!(reason.contains("negative input")),
            other => panic!("unexpected error: {:?}", other),
        }

        // The worker thread survived and keeps serving.
        let out = pool
            .submit(json!({"x": 1.0}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, ScoreOutput::new(json!(2.0)));
        assert_eq!(pool.in_flight(), 0);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_unavailable() {
        let pool = pool(1, 1);
        pool.shutdown();
        let err = pool
            .submit(json!({"x": 1.0}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BallastError::DependencyUnavailable { .. }));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
