pub mod api;
pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;

use crate::api::AppState;
use crate::auth::PasswordHasher;
use crate::circuit_breaker::{RetryConfig, RetryExecutor};
use crate::config::{ServiceConfig, StoreBackend, StoreConfig};
use crate::error::{Result, ServiceError};
use crate::metrics::MetricsService;
use crate::rate_limit::{Clock, MemoryStore, RateLimitStore, RedisStore, SystemClock};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Open the configured limiter store.
///
/// Redis connections are retried with exponential backoff; a store that is
/// still unreachable afterwards aborts startup.
pub async fn connect_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimitStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-process limiter store; limits are not shared across instances");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
        StoreBackend::Redis => {
            let retry = RetryExecutor::new(RetryConfig::with_max_retries(config.connect_retries));
            let url = config.url.expose_secret();

            let store = retry
                .execute("redis_connect", || async move {
                    let store = RedisStore::connect(url).await?;
                    store.ping().await?;
                    Ok::<_, redis::RedisError>(store)
                })
                .await
                .map_err(|e| ServiceError::Internal(format!("Failed to connect to Redis: {}", e)))?;

            info!("Connected to Redis limiter store");
            Ok(Arc::new(store))
        }
    }
}

/// Initialize and run the service until shutdown
pub async fn init_service(config: ServiceConfig) -> Result<()> {
    config.validate()?;

    info!("Starting sentinel");

    let metrics = MetricsService::new()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config.store, clock.clone()).await?;
    let state = AppState::new(&config, store, clock, metrics, PasswordHasher::default())?;

    let app = api::router(state, Duration::from_secs(config.server.timeout_secs));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "Sentinel ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ServiceError::Internal(format!("Server error: {}", e)))?;

    info!("Sentinel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
