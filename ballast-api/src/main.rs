//! Ballast API server binary.

use std::sync::Arc;

use ballast_api::{
    create_api_router, init_tracing, ApiError, ApiResult, AppState, Arbiter, LinearScorer,
    ServerConfig, METRICS,
};
use ballast_core::{BallastConfig, BallastError};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let server_config =
        ServerConfig::from_env().map_err(|e| ApiError::internal_error(e.to_string()))?;
    init_tracing(server_config.log_format)?;

    let config = match &server_config.config_path {
        Some(path) => {
            BallastConfig::from_file(path).map_err(|e| ApiError::internal_error(e.to_string()))?
        }
        None => BallastConfig::from_env(),
    };

    let metrics = METRICS.as_ref().map_err(Clone::clone)?.clone();
    let cache_backend = server_config.cache_backend().map_err(BallastError::from)?;
    let scorer = LinearScorer::new(server_config.scorer_weights.clone());
    let arbiter = Arc::new(
        Arbiter::builder(config)
            .scorer(Arc::new(scorer))
            .cache_backend(cache_backend)
            .metrics(metrics.clone())
            .build()?,
    );

    let app = create_api_router(AppState::new(Arc::clone(&arbiter), metrics));

    let addr = server_config.socket_addr();
    tracing::info!(%addr, "Starting Ballast API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    tokio::task::spawn_blocking(move || arbiter.shutdown())
        .await
        .map_err(|e| ApiError::internal_error(format!("Pool shutdown failed: {}", e)))?;

    tracing::info!("Ballast API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
