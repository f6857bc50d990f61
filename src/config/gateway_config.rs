//! Payment gateway and currency configuration from environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct GatewayEnvConfig {
    pub shop_id: String,
    pub secret: String,
    pub base_url: String,
    pub sandbox: bool,
    /// Currency the gateway settles in; order currency converts to this.
    pub payment_currency: String,
    pub frontend_url: String,
    pub backend_url: String,
    /// Applied when the live rate fetch fails.
    pub rate_fallback: Decimal,
    pub exchange_rate_url: String,
}

impl GatewayEnvConfig {
    pub fn from_env() -> Result<Self> {
        let shop_id = env::var("GATEWAY_SHOP_ID").context("GATEWAY_SHOP_ID not configured")?;
        let secret = env::var("GATEWAY_SECRET").context("GATEWAY_SECRET not configured")?;
        if shop_id.is_empty() {
            anyhow::bail!("GATEWAY_SHOP_ID is empty");
        }
        if secret.is_empty() {
            anyhow::bail!("GATEWAY_SECRET is empty");
        }

        let rate_fallback = match env::var("EUR_RATE_FALLBACK") {
            Ok(raw) => Decimal::from_str(&raw)
                .with_context(|| format!("Failed to parse EUR_RATE_FALLBACK = {:?}", raw))?,
            Err(_) => Decimal::new(32, 1), // 3.2
        };

        Ok(Self {
            shop_id,
            secret,
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://checkout.paypro.by".to_string()),
            sandbox: env::var("GATEWAY_SANDBOX")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            payment_currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "EUR".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            rate_fallback,
            exchange_rate_url: env::var("EXCHANGE_RATE_URL")
                .unwrap_or_else(|_| "https://api.exchangerate.host/latest".to_string()),
        })
    }
}
