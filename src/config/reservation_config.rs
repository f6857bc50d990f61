//! Reservation and scheduler timing knobs from environment variables.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ReservationEnvConfig {
    /// How long a checkout holds stock before the sweep releases it.
    pub reservation_ttl_minutes: i64,
    pub scheduler_interval_minutes: i64,
    /// Pending orders older than this with no active holds get cancelled.
    pub hard_timeout_minutes: i64,
    pub batch_size: usize,
    pub sweep_log_retention: usize,
    /// Pull reconciliation ignores pending orders older than this.
    pub pull_window_hours: i64,
    /// SQLite busy timeout; lock waits beyond it surface as retryable.
    pub lock_timeout_seconds: u64,
    pub scheduler_lock_file: String,
}

impl ReservationEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            reservation_ttl_minutes: parse_i64("RESERVATION_TTL_MINUTES", 15)?,
            scheduler_interval_minutes: parse_i64("SCHEDULER_INTERVAL_MINUTES", 5)?,
            hard_timeout_minutes: parse_i64("HARD_TIMEOUT_MINUTES", 15)?,
            batch_size: parse_i64("BATCH_SIZE", 100)? as usize,
            sweep_log_retention: parse_i64("SWEEP_LOG_RETENTION", 50)? as usize,
            pull_window_hours: parse_i64("PULL_WINDOW_HOURS", 24)?,
            lock_timeout_seconds: parse_i64("LOCK_TIMEOUT_SECONDS", 10)? as u64,
            scheduler_lock_file: env::var("SCHEDULER_LOCK_FILE")
                .unwrap_or_else(|_| "data/scheduler.lock".to_string()),
        })
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("Failed to parse {} = {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
