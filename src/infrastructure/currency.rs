//! Currency conversion for gateway settlement.
//!
//! The live converter fetches a rate from an exchange-rate endpoint and
//! caches it for an hour; any fetch failure falls back to the configured
//! rate so checkout never blocks on a rate vendor outage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{EngineError, EngineResult, RateError};
use crate::domain::money::round_half_up;
use crate::domain::ports::CurrencyService;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

const RATE_CACHE_TTL_MINUTES: i64 = 60;

/// Pin-the-rate converter for tests and deployments that settle in the
/// order currency anyway.
pub struct FixedRateConverter {
    rate: Decimal,
}

impl FixedRateConverter {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl CurrencyService for FixedRateConverter {
    async fn convert(&self, amount: Decimal, from: &str, to: &str) -> EngineResult<Decimal> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(round_half_up(amount));
        }
        Ok(round_half_up(amount * self.rate))
    }
}

struct CachedRate {
    rate: Decimal,
    fetched_at: DateTime<Utc>,
}

/// Live converter against an exchangerate.host style endpoint
/// (`?base=EUR&symbols=BYN` -> `{"rates": {"BYN": 3.21}}`).
pub struct ExchangeRateConverter {
    client: ClientWithMiddleware,
    endpoint: String,
    fallback_rate: Decimal,
    cache: Mutex<Option<CachedRate>>,
}

impl ExchangeRateConverter {
    pub fn new(endpoint: impl Into<String>, fallback_rate: Decimal) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            endpoint: endpoint.into(),
            fallback_rate,
            cache: Mutex::new(None),
        }
    }

    async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal, RateError> {
        let url = format!("{}?base={}&symbols={}", self.endpoint, from, to);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RateError::Fetch(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RateError::Fetch(e.to_string()))?;

        let raw = body
            .get("rates")
            .and_then(|rates| rates.get(to))
            .ok_or_else(|| RateError::MissingRate {
                pair: format!("{}/{}", from, to),
            })?;

        // The endpoint reports floats; go through the string form to keep
        // the decimal exact.
        let rate_str = raw.to_string();
        Decimal::from_str(&rate_str).map_err(|_| RateError::MissingRate {
            pair: format!("{}/{}", from, to),
        })
    }

    async fn current_rate(&self, from: &str, to: &str) -> Decimal {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.as_ref()
                && Utc::now() - cached.fetched_at < Duration::minutes(RATE_CACHE_TTL_MINUTES)
            {
                return cached.rate;
            }
        }

        match self.fetch_rate(from, to).await {
            Ok(rate) => {
                info!("Fetched {}/{} rate: {}", from, to, rate);
                *self.cache.lock().unwrap() = Some(CachedRate {
                    rate,
                    fetched_at: Utc::now(),
                });
                rate
            }
            Err(e) => {
                warn!(
                    "Rate fetch failed ({}), using fallback rate {}",
                    e, self.fallback_rate
                );
                self.fallback_rate
            }
        }
    }
}

#[async_trait]
impl CurrencyService for ExchangeRateConverter {
    async fn convert(&self, amount: Decimal, from: &str, to: &str) -> EngineResult<Decimal> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(round_half_up(amount));
        }
        if amount < Decimal::ZERO {
            return Err(EngineError::Conversion {
                reason: format!("negative amount {}", amount),
            });
        }
        let rate = self.current_rate(&from.to_uppercase(), &to.to_uppercase()).await;
        Ok(round_half_up(amount * rate))
    }
}
