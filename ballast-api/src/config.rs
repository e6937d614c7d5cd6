//! Server configuration for the `ballast-api` binary.
//!
//! Core tunables live in [`ballast_core::BallastConfig`]; this covers only
//! what the HTTP process itself needs.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use ballast_core::ConfigError;
use ballast_storage::{CacheBackend, InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError};

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_SIZE_MB: usize = 256;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "text" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub log_format: LogFormat,
    /// TOML file holding a `BallastConfig`; environment is used when absent.
    pub config_path: Option<PathBuf>,
    /// Per-field weights for the built-in linear scorer.
    pub scorer_weights: BTreeMap<String, f64>,
    /// LMDB directory for the cache; the in-memory backend is used when absent.
    pub cache_path: Option<PathBuf>,
    pub cache_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            log_format: LogFormat::default(),
            config_path: None,
            scorer_weights: BTreeMap::new(),
            cache_path: None,
            cache_size_mb: DEFAULT_CACHE_SIZE_MB,
        }
    }
}

impl ServerConfig {
    /// Read `BALLAST_API_BIND`, `PORT` / `BALLAST_API_PORT`,
    /// `BALLAST_LOG_FORMAT`, `BALLAST_CONFIG`, `BALLAST_SCORER_WEIGHTS`,
    /// `BALLAST_CACHE_PATH` and `BALLAST_CACHE_SIZE_MB`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("BALLAST_API_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = host.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
            field: "BALLAST_API_BIND".to_string(),
            value: host.clone(),
            reason: e.to_string(),
        })?;

        let port = match lookup("PORT").or_else(|| lookup("BALLAST_API_PORT")) {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                field: "BALLAST_API_PORT".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let log_format = lookup("BALLAST_LOG_FORMAT")
            .and_then(|raw| LogFormat::parse(&raw))
            .unwrap_or_default();

        let scorer_weights = match lookup("BALLAST_SCORER_WEIGHTS") {
            Some(raw) => parse_weights(&raw)?,
            None => BTreeMap::new(),
        };

        let cache_size_mb = match lookup("BALLAST_CACHE_SIZE_MB") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(mb) if mb > 0 => mb,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "BALLAST_CACHE_SIZE_MB".to_string(),
                        value: raw,
                        reason: "must be a positive integer".to_string(),
                    })
                }
            },
            None => DEFAULT_CACHE_SIZE_MB,
        };

        Ok(Self {
            bind,
            port,
            log_format,
            config_path: lookup("BALLAST_CONFIG").map(PathBuf::from),
            scorer_weights,
            cache_path: lookup("BALLAST_CACHE_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            cache_size_mb,
        })
    }

    /// Open the configured cache backend.
    pub fn cache_backend(&self) -> Result<Arc<dyn CacheBackend>, LmdbCacheError> {
        match &self.cache_path {
            Some(path) => {
                tracing::info!(path = %path.display(), size_mb = self.cache_size_mb, "Using LMDB cache");
                Ok(Arc::new(LmdbCacheBackend::new(path, self.cache_size_mb)?))
            }
            None => Ok(Arc::new(InMemoryCacheBackend::new())),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Parse `field=weight,field=weight`.
fn parse_weights(raw: &str) -> Result<BTreeMap<String, f64>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "BALLAST_SCORER_WEIGHTS".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut weights = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (field, weight) = pair
            .split_once('=')
            .ok_or_else(|| invalid("expected field=weight"))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| invalid("weight must be a number"))?;
        if !weight.is_finite() {
            return Err(invalid("weight must be finite"));
        }
        weights.insert(field.trim().to_string(), weight);
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.socket_addr().port(), 3000);
    }

    #[test]
    fn test_port_precedence_and_format() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("BALLAST_API_PORT", "9090"),
            ("BALLAST_API_BIND", "127.0.0.1"),
            ("BALLAST_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&[("BALLAST_API_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_scorer_weights() {
        let config = ServerConfig::from_lookup(lookup(&[(
            "BALLAST_SCORER_WEIGHTS",
            "age=0.5, income = 2",
        )]))
        .unwrap();
        assert_eq!(config.scorer_weights.get("age"), Some(&0.5));
        assert_eq!(config.scorer_weights.get("income"), Some(&2.0));

        assert!(parse_weights("age").is_err());
        assert!(parse_weights("age=x").is_err());
        assert!(parse_weights("").unwrap().is_empty());
    }

    #[test]
    fn test_cache_backend_selection() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.cache_path.is_none());
        assert!(config.cache_backend().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let config = ServerConfig::from_lookup(lookup(&[
            ("BALLAST_CACHE_PATH", path.to_str().unwrap()),
            ("BALLAST_CACHE_SIZE_MB", "16"),
        ]))
        .unwrap();
        assert_eq!(config.cache_path.as_deref(), Some(path.as_path()));
        assert_eq!(config.cache_size_mb, 16);
        assert!(config.cache_backend().is_ok());
        assert!(path.exists());

        let err = ServerConfig::from_lookup(lookup(&[("BALLAST_CACHE_SIZE_MB", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
