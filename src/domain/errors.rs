use thiserror::Error;

/// One line of a failed batch reservation: what was asked for and what the
/// ledger could actually give.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LineDeficit {
    pub stock_item_id: String,
    pub name: String,
    pub requested: i64,
    pub available: i64,
}

/// Errors raised by the reservation/order engine.
///
/// Variants mirror the recovery strategy: `LockTimeout` and
/// `GatewayUnreachable`/`GatewayTimeout` are retryable at a higher layer,
/// everything else surfaces to the originating call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient stock for {} line(s)", failures.len())]
    InsufficientStock { failures: Vec<LineDeficit> },

    #[error("database lock wait exceeded the configured timeout")]
    LockTimeout,

    #[error("payment gateway unreachable: {reason}")]
    GatewayUnreachable { reason: String },

    #[error("payment gateway request timed out")]
    GatewayTimeout,

    #[error("payment gateway rejected the request: {message}")]
    GatewayRejected {
        message: String,
        details: Vec<String>,
    },

    #[error("transition {event} not applicable from ({order_status}, {payment_status})")]
    StateGuard {
        event: String,
        order_status: String,
        payment_status: String,
    },

    #[error("integrity constraint violated: {constraint}")]
    Integrity { constraint: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("currency conversion failed: {reason}")]
    Conversion { reason: String },

    #[error(transparent)]
    Database(sqlx::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// True for errors a caller may retry verbatim (the HTTP layer retries
    /// once, the scheduler retries on its next tick).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout | Self::GatewayUnreachable { .. } | Self::GatewayTimeout
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return Self::LockTimeout;
        }
        if let Some(db_err) = err.as_database_error() {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            // SQLITE_BUSY / SQLITE_LOCKED family: another writer held the
            // database past busy_timeout.
            if matches!(code.as_str(), "5" | "6" | "261" | "262" | "517") {
                return Self::LockTimeout;
            }
            if db_err.is_check_violation()
                || db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
            {
                return Self::Integrity {
                    constraint: db_err.message().to_string(),
                };
            }
        }
        Self::Database(err)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the currency-rate fetcher; the converter falls back to the
/// configured rate when the fetch fails.
#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate endpoint returned no usable rate for {pair}")]
    MissingRate { pair: String },

    #[error("rate fetch failed: {0}")]
    Fetch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_formatting() {
        let err = EngineError::InsufficientStock {
            failures: vec![LineDeficit {
                stock_item_id: "si-1".into(),
                name: "Linen Shirt".into(),
                requested: 3,
                available: 1,
            }],
        };
        assert!(err.to_string().contains("1 line(s)"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::LockTimeout.is_retryable());
        assert!(
            EngineError::GatewayUnreachable {
                reason: "connect refused".into()
            }
            .is_retryable()
        );
        assert!(
            !EngineError::Validation {
                reason: "empty cart".into()
            }
            .is_retryable()
        );
    }
}
