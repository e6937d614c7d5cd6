//! Probabilistic early expiry.
//!
//! When a hot entry is close to expiring, every concurrent reader would
//! otherwise miss at the same instant and recompute it together. Instead,
//! inside the last `fraction` of an entry's TTL each read is reported as a
//! miss with a probability that rises linearly from 0 at the window start to
//! 1 at expiry. A few readers refresh early; the rest keep getting the value.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Probability that a read of an entry should be reported as a miss.
///
/// `remaining` is the entry's remaining TTL, `original` the TTL it was written
/// with. Returns 0 outside the guard window and a value in `(0, 1]` inside it.
pub fn early_miss_probability(remaining: Duration, original: Duration, fraction: f64) -> f64 {
    if fraction.is_nan() || fraction <= 0.0 || original.is_zero() {
        return 0.0;
    }
    let window = original.as_secs_f64() * fraction.min(1.0);
    let remaining = remaining.as_secs_f64();
    if remaining >= window {
        return 0.0;
    }
    (1.0 - remaining / window).clamp(0.0, 1.0)
}

/// Random source plus guard fraction used by the cache on every hit.
#[derive(Debug)]
pub struct StampedeGuard {
    fraction: f64,
    rng: Mutex<StdRng>,
}

impl StampedeGuard {
    /// Guard seeded from the operating system.
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Guard with a fixed seed, for reproducible tests.
    pub fn seeded(fraction: f64, seed: u64) -> Self {
        Self {
            fraction,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Roll the dice for one read.
    pub fn should_refresh(&self, remaining: Duration, original: Duration) -> bool {
        let p = early_miss_probability(remaining, original, self.fraction);
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        let roll: f64 = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .random();
        roll < p
    }
}
