//! Configuration for the order/inventory backend.
//!
//! Structured loading from environment variables, organised by concern:
//! reservation/scheduler timing, payment gateway, HTTP server. Binaries
//! call [`Config::from_env`] once after `dotenvy::dotenv()` and pass the
//! struct down; nothing reads the environment after startup.

mod gateway_config;
mod reservation_config;
mod server_config;

pub use gateway_config::GatewayEnvConfig;
pub use reservation_config::ReservationEnvConfig;
pub use server_config::ServerEnvConfig;

use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;

/// Aggregated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Database / server
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    pub admin_api_token: String,

    // Reservation engine
    pub reservation_ttl_minutes: i64,
    pub scheduler_interval_minutes: i64,
    pub hard_timeout_minutes: i64,
    pub batch_size: usize,
    pub sweep_log_retention: usize,
    pub pull_window_hours: i64,
    pub lock_timeout_seconds: u64,
    pub scheduler_lock_file: String,

    // Gateway
    pub gateway_shop_id: String,
    pub gateway_secret: String,
    pub gateway_base_url: String,
    pub gateway_sandbox: bool,
    pub payment_currency: String,
    pub frontend_url: String,
    pub backend_url: String,
    pub rate_fallback: Decimal,
    pub exchange_rate_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerEnvConfig::from_env().context("Failed to load server config")?;
        let reservation =
            ReservationEnvConfig::from_env().context("Failed to load reservation config")?;
        let gateway = GatewayEnvConfig::from_env().context("Failed to load gateway config")?;

        Ok(Self {
            database_url: server.database_url,
            bind_address: server.bind_address,
            port: server.port,
            admin_api_token: server.admin_api_token,

            reservation_ttl_minutes: reservation.reservation_ttl_minutes,
            scheduler_interval_minutes: reservation.scheduler_interval_minutes,
            hard_timeout_minutes: reservation.hard_timeout_minutes,
            batch_size: reservation.batch_size,
            sweep_log_retention: reservation.sweep_log_retention,
            pull_window_hours: reservation.pull_window_hours,
            lock_timeout_seconds: reservation.lock_timeout_seconds,
            scheduler_lock_file: reservation.scheduler_lock_file,

            gateway_shop_id: gateway.shop_id,
            gateway_secret: gateway.secret,
            gateway_base_url: gateway.base_url,
            gateway_sandbox: gateway.sandbox,
            payment_currency: gateway.payment_currency,
            frontend_url: gateway.frontend_url,
            backend_url: gateway.backend_url,
            rate_fallback: gateway.rate_fallback,
            exchange_rate_url: gateway.exchange_rate_url,
        })
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::minutes(self.reservation_ttl_minutes)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::minutes(self.hard_timeout_minutes)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::minutes(self.scheduler_interval_minutes)
    }

    pub fn pull_window(&self) -> Duration {
        Duration::hours(self.pull_window_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Manual construction mirror of what tests use; keeps field coverage
    /// honest when the struct grows.
    pub fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".into(),
            bind_address: "127.0.0.1".into(),
            port: 0,
            admin_api_token: "test-admin".into(),
            reservation_ttl_minutes: 15,
            scheduler_interval_minutes: 5,
            hard_timeout_minutes: 15,
            batch_size: 100,
            sweep_log_retention: 50,
            pull_window_hours: 24,
            lock_timeout_seconds: 10,
            scheduler_lock_file: "data/scheduler.lock".into(),
            gateway_shop_id: "shop".into(),
            gateway_secret: "secret".into(),
            gateway_base_url: "https://checkout.example".into(),
            gateway_sandbox: true,
            payment_currency: "EUR".into(),
            frontend_url: "http://localhost:3000".into(),
            backend_url: "http://localhost:8000".into(),
            rate_fallback: dec!(3.2),
            exchange_rate_url: "https://api.exchangerate.host/latest".into(),
        }
    }

    #[test]
    fn test_duration_helpers() {
        let config = test_config();
        assert_eq!(config.reservation_ttl(), Duration::minutes(15));
        assert_eq!(config.hard_timeout(), Duration::minutes(15));
        assert_eq!(config.scheduler_interval(), Duration::minutes(5));
        assert_eq!(config.pull_window(), Duration::hours(24));
    }
}
