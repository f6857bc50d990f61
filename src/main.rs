//! Atelier API server.
//!
//! Serves the order/inventory HTTP surface. State lives in the database;
//! this process holds no cross-request memory, so any number of instances
//! can run behind a load balancer. The expiry scheduler is the separate
//! `scheduler` binary.
//!
//! # Usage
//! ```sh
//! PORT=8000 cargo run --bin atelier
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use atelier::config::Config;
use atelier::infrastructure::currency::ExchangeRateConverter;
use atelier::infrastructure::gateway::paypro::PayProGateway;
use atelier::infrastructure::gateway::verifier::InsecureVerifier;
use atelier::infrastructure::notifications::LoggingConfirmationSink;
use atelier::infrastructure::persistence::Database;
use atelier::interfaces::http::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Atelier API {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: db={}, gateway={}, reservation_ttl={}m",
        config.database_url, config.gateway_base_url, config.reservation_ttl_minutes
    );

    let db = Database::new(
        &config.database_url,
        Duration::from_secs(config.lock_timeout_seconds),
    )
    .await?;

    let state = AppState::new(
        db,
        &config,
        Arc::new(PayProGateway::new(&config)),
        Arc::new(ExchangeRateConverter::new(
            config.exchange_rate_url.clone(),
            config.rate_fallback,
        )),
        // Accept-all stub until the gateway documents webhook signing.
        Arc::new(InsecureVerifier),
        Arc::new(LoggingConfirmationSink),
    );

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received. Exiting...");
        })
        .await?;

    Ok(())
}
