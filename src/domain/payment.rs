//! Payment attempts and gateway status normalisation.
//!
//! One order may accumulate several attempts against the hosted checkout;
//! the `gateway_token` is unique per attempt and is the idempotency key for
//! every later status query. Only the latest terminal attempt is
//! authoritative for the order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::order::LifecycleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AttemptStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "succeeded" => Ok(AttemptStatus::Succeeded),
            "failed" => Ok(AttemptStatus::Failed),
            "cancelled" => Ok(AttemptStatus::Cancelled),
            _ => anyhow::bail!("Invalid attempt status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub id: i64,
    pub order_id: String,
    pub gateway_token: String,
    pub method_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: AttemptStatus,
    /// Opaque key-value log of gateway interactions; never holds card data.
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly created hosted-checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub token: String,
    pub redirect_url: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Normalised reading of whatever status string the gateway reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Succeeded,
    Failed,
    Cancelled,
    Pending,
    Unknown,
}

impl GatewayStatus {
    /// Case-insensitive normalisation of the gateway's status vocabulary.
    /// Anything unrecognised maps to `Unknown`, which callers log and
    /// otherwise ignore.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "completed" | "succeeded" | "success" | "paid" | "successful" => {
                GatewayStatus::Succeeded
            }
            "failed" | "declined" | "error" => GatewayStatus::Failed,
            "cancelled" | "canceled" => GatewayStatus::Cancelled,
            "pending" | "processing" | "authorized" => GatewayStatus::Pending,
            _ => GatewayStatus::Unknown,
        }
    }

    /// The lifecycle event this status drives, if any.
    pub fn as_event(&self) -> Option<LifecycleEvent> {
        match self {
            GatewayStatus::Succeeded => Some(LifecycleEvent::PaymentSucceeded),
            GatewayStatus::Failed => Some(LifecycleEvent::PaymentFailed),
            GatewayStatus::Cancelled => Some(LifecycleEvent::PaymentCancelled),
            GatewayStatus::Pending | GatewayStatus::Unknown => None,
        }
    }

    /// The attempt status to record when this status is applied.
    pub fn as_attempt_status(&self) -> Option<AttemptStatus> {
        match self {
            GatewayStatus::Succeeded => Some(AttemptStatus::Succeeded),
            GatewayStatus::Failed => Some(AttemptStatus::Failed),
            GatewayStatus::Cancelled => Some(AttemptStatus::Cancelled),
            GatewayStatus::Pending | GatewayStatus::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalisation_table() {
        for raw in ["completed", "Succeeded", "SUCCESS", "paid", "successful"] {
            assert_eq!(GatewayStatus::normalize(raw), GatewayStatus::Succeeded);
        }
        for raw in ["failed", "Declined", "ERROR"] {
            assert_eq!(GatewayStatus::normalize(raw), GatewayStatus::Failed);
        }
        for raw in ["cancelled", "canceled", "CANCELED"] {
            assert_eq!(GatewayStatus::normalize(raw), GatewayStatus::Cancelled);
        }
        for raw in ["pending", "processing", "authorized"] {
            assert_eq!(GatewayStatus::normalize(raw), GatewayStatus::Pending);
        }
        assert_eq!(GatewayStatus::normalize("weird"), GatewayStatus::Unknown);
        assert_eq!(GatewayStatus::normalize(" paid "), GatewayStatus::Succeeded);
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(
            GatewayStatus::Succeeded.as_event(),
            Some(LifecycleEvent::PaymentSucceeded)
        );
        assert_eq!(
            GatewayStatus::Failed.as_event(),
            Some(LifecycleEvent::PaymentFailed)
        );
        assert_eq!(
            GatewayStatus::Cancelled.as_event(),
            Some(LifecycleEvent::PaymentCancelled)
        );
        assert!(GatewayStatus::Pending.as_event().is_none());
        assert!(GatewayStatus::Unknown.as_event().is_none());
    }
}
