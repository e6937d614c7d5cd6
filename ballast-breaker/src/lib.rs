//! Ballast Breaker - Dependency Circuit Breakers
//!
//! A [`DependencyBreaker`] wraps calls to one external dependency and stops
//! calling it once it has failed `failure_threshold` times in a row. After
//! `open_duration` a single probe call decides whether to close again.
//!
//! Only dependency failures move a breaker. Deadline overruns, cancellation
//! and late results from a previous state are ignored.

mod breaker;
mod error;
mod registry;

pub use breaker::{BreakerSnapshot, CallPermit, DependencyBreaker};
pub use error::CallError;
pub use registry::BreakerRegistry;
