use anyhow::Context;
use sentinel::{
    config::ServiceConfig,
    init_service,
    observability::{init_tracing, shutdown_telemetry},
};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/sentinel.yaml".to_string());

    let config = ServiceConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_tracing(config.telemetry.clone()).context("Failed to initialize tracing")?;

    let result = init_service(config).await;
    shutdown_telemetry();

    result.context("Sentinel error")
}
