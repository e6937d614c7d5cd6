//! Configuration types
//!
//! `BallastConfig` carries every tunable the core recognises. It can be built
//! from defaults, from `BALLAST_*` environment variables, or from a TOML file.
//! Durations are expressed in milliseconds in both external forms.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::{
    BallastResult, ConfigError, CACHE_DEPENDENCY, DEFAULT_REQUEST_CLASS, STORE_DEPENDENCY,
};

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_OPEN_DURATION_MS: u64 = 30_000;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_STAMPEDE_GUARD_FRACTION: f64 = 0.1;
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ARTIFACT_VERSION: u64 = 1;

/// Per-dependency breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    #[serde(with = "duration_ms", rename = "open_duration_ms")]
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration: Duration::from_millis(DEFAULT_OPEN_DURATION_MS),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallastConfig {
    /// Breaker settings keyed by dependency name (`cache`, `durable_store`).
    pub breakers: BTreeMap<String, BreakerConfig>,
    /// Number of scoring worker threads.
    pub worker_pool_size: usize,
    /// Jobs allowed to wait for a worker beyond those being executed.
    pub queue_depth: usize,
    /// TTL applied to cache writes.
    #[serde(with = "duration_ms", rename = "cache_ttl_ms")]
    pub cache_ttl: Duration,
    /// Final fraction of an entry's TTL in which early refresh may trigger.
    pub stampede_guard_fraction: f64,
    /// Deadline for each fallback source lookup.
    #[serde(with = "duration_ms", rename = "resolve_timeout_ms")]
    pub resolve_timeout: Duration,
    /// Deadline for a whole request when the request carries none.
    #[serde(with = "duration_ms", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// Request classes the arbiter serves, one fallback cascade each.
    pub request_classes: Vec<String>,
    /// Process-wide value returned when every dependency is unavailable.
    pub static_default: Value,
    /// Artifact version active at startup.
    pub initial_artifact_version: u64,
}

impl Default for BallastConfig {
    fn default() -> Self {
        let mut breakers = BTreeMap::new();
        breakers.insert(CACHE_DEPENDENCY.to_string(), BreakerConfig::default());
        breakers.insert(STORE_DEPENDENCY.to_string(), BreakerConfig::default());

        Self {
            breakers,
            worker_pool_size: default_pool_size(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            stampede_guard_fraction: DEFAULT_STAMPEDE_GUARD_FRACTION,
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            request_classes: vec![DEFAULT_REQUEST_CLASS.to_string()],
            static_default: serde_json::json!({ "score": null, "degraded": true }),
            initial_artifact_version: DEFAULT_ARTIFACT_VERSION,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BallastConfig {
    /// Breaker settings for a dependency, falling back to defaults.
    pub fn breaker(&self, dependency: &str) -> BreakerConfig {
        self.breakers.get(dependency).copied().unwrap_or_default()
    }

    /// Set breaker settings for a dependency.
    pub fn with_breaker(mut self, dependency: impl Into<String>, config: BreakerConfig) -> Self {
        self.breakers.insert(dependency.into(), config);
        self
    }

    /// Set pool size and queue depth.
    pub fn with_pool(mut self, worker_pool_size: usize, queue_depth: usize) -> Self {
        self.worker_pool_size = worker_pool_size;
        self.queue_depth = queue_depth;
        self
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the stampede guard fraction.
    pub fn with_stampede_guard_fraction(mut self, fraction: f64) -> Self {
        self.stampede_guard_fraction = fraction;
        self
    }

    /// Maximum jobs admitted to the scoring pool at once.
    pub fn pool_capacity(&self) -> usize {
        self.worker_pool_size + self.queue_depth
    }

    /// Create BallastConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BALLAST_WORKER_POOL_SIZE`, `BALLAST_QUEUE_DEPTH`
    /// - `BALLAST_CACHE_TTL_MS`, `BALLAST_STAMPEDE_GUARD_FRACTION`
    /// - `BALLAST_RESOLVE_TIMEOUT_MS`, `BALLAST_REQUEST_TIMEOUT_MS`
    /// - `BALLAST_REQUEST_CLASSES`: comma-separated class names
    /// - `BALLAST_STATIC_DEFAULT`: JSON document
    /// - `BALLAST_ARTIFACT_VERSION`
    /// - `BALLAST_CACHE_FAILURE_THRESHOLD`, `BALLAST_CACHE_OPEN_DURATION_MS`
    /// - `BALLAST_STORE_FAILURE_THRESHOLD`, `BALLAST_STORE_OPEN_DURATION_MS`
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by `from_env`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let breaker_from = |prefix: &str, dependency: &str| {
            let base = defaults.breaker(dependency);
            BreakerConfig {
                failure_threshold: lookup(&format!("BALLAST_{}_FAILURE_THRESHOLD", prefix))
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(base.failure_threshold),
                open_duration: parsed(&format!("BALLAST_{}_OPEN_DURATION_MS", prefix))
                    .map(Duration::from_millis)
                    .unwrap_or(base.open_duration),
            }
        };

        let mut breakers = BTreeMap::new();
        breakers.insert(
            CACHE_DEPENDENCY.to_string(),
            breaker_from("CACHE", CACHE_DEPENDENCY),
        );
        breakers.insert(
            STORE_DEPENDENCY.to_string(),
            breaker_from("STORE", STORE_DEPENDENCY),
        );

        let request_classes = lookup("BALLAST_REQUEST_CLASSES")
            .map(|s| {
                s.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|classes| !classes.is_empty())
            .unwrap_or_else(|| defaults.request_classes.clone());

        let static_default = lookup("BALLAST_STATIC_DEFAULT")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| defaults.static_default.clone());

        Self {
            breakers,
            worker_pool_size: parsed("BALLAST_WORKER_POOL_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.worker_pool_size),
            queue_depth: parsed("BALLAST_QUEUE_DEPTH")
                .map(|v| v as usize)
                .unwrap_or(defaults.queue_depth),
            cache_ttl: parsed("BALLAST_CACHE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_ttl),
            stampede_guard_fraction: lookup("BALLAST_STAMPEDE_GUARD_FRACTION")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.stampede_guard_fraction),
            resolve_timeout: parsed("BALLAST_RESOLVE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.resolve_timeout),
            request_timeout: parsed("BALLAST_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            request_classes,
            static_default,
            initial_artifact_version: parsed("BALLAST_ARTIFACT_VERSION")
                .unwrap_or(defaults.initial_artifact_version),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(BallastError::Config) if invalid.
    pub fn validate(&self) -> BallastResult<()> {
        for (dependency, breaker) in &self.breakers {
            if breaker.failure_threshold == 0 {
                return Err(invalid(
                    format!("breakers.{}.failure_threshold", dependency),
                    "0",
                    "must be at least 1",
                ));
            }
            if breaker.open_duration.is_zero() {
                return Err(invalid(
                    format!("breakers.{}.open_duration_ms", dependency),
                    "0",
                    "must be positive",
                ));
            }
        }

        if self.worker_pool_size == 0 {
            return Err(invalid("worker_pool_size", "0", "must be at least 1"));
        }

        if self.cache_ttl.is_zero() {
            return Err(invalid("cache_ttl_ms", "0", "must be positive"));
        }

        let fraction = self.stampede_guard_fraction;
        if !fraction.is_finite() || !(0.0..1.0).contains(&fraction) {
            return Err(invalid(
                "stampede_guard_fraction",
                fraction.to_string(),
                "must be in [0, 1)",
            ));
        }

        if self.resolve_timeout.is_zero() {
            return Err(invalid("resolve_timeout_ms", "0", "must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout_ms", "0", "must be positive"));
        }

        if self.request_classes.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "request_classes".to_string(),
            }
            .into());
        }
        if let Some(empty) = self.request_classes.iter().find(|c| c.trim().is_empty()) {
            return Err(invalid("request_classes", empty.clone(), "names must be non-empty"));
        }

        Ok(())
    }
}

fn invalid(
    field: impl Into<String>,
    value: impl Into<String>,
    reason: impl Into<String>,
) -> crate::BallastError {
    ConfigError::InvalidValue {
        field: field.into(),
        value: value.into(),
        reason: reason.into(),
    }
    .into()
}

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
