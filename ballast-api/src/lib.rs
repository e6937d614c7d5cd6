//! Ballast API - Request Arbiter and HTTP Surface
//!
//! Wires the breaker and cache crates into a serving core:
//! - [`FallbackCascade`]: cache, durable store, static default
//! - [`Arbiter`]: per-request orchestration over a bounded [`ScoringPool`]
//! - Prometheus metrics, tracing setup and an axum router

pub mod arbiter;
pub mod cascade;
pub mod config;
pub mod error;
pub mod routes;
pub mod scorer;
pub mod telemetry;

pub use arbiter::{Arbiter, ArbiterBuilder, ScoreResponse, ScoringPool, POOL_DEPENDENCY};
pub use cascade::{CacheSource, FallbackCascade, FallbackSource, Resolution, StoreSource};
pub use config::{LogFormat, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::{create_api_router, AppState};
pub use scorer::LinearScorer;
pub use telemetry::{init_tracing, PrometheusMetricsSink, METRICS};
