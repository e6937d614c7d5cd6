//! Tracing subscriber initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;
use crate::error::{ApiError, ApiResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ballast_api=debug,tower_http=info,info";

/// Install the global tracing subscriber.
///
/// Call once at startup, before any span is entered. Fails if a subscriber is
/// already installed.
pub fn init_tracing(format: LogFormat) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}
