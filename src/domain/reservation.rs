//! Time-bounded holds binding an order line's quantity to a stock item.
//!
//! A reservation terminates exactly once: FULFILLED converts the hold into a
//! permanent stock decrement, RELEASED returns it to availability. A row is
//! ACTIVE iff `terminal_at` is unset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Active,
    Fulfilled,
    Released,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationState::Active => "active",
            ReservationState::Fulfilled => "fulfilled",
            ReservationState::Released => "released",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ReservationState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationState::Active),
            "fulfilled" => Ok(ReservationState::Fulfilled),
            "released" => Ok(ReservationState::Released),
            _ => anyhow::bail!("Invalid reservation state: {}", s),
        }
    }
}

/// Terminal outcome requested by a caller. Distinct from
/// [`ReservationState`] so `Active` can never be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Fulfilled,
    Released,
}

impl ReservationOutcome {
    pub fn as_state(&self) -> ReservationState {
        match self {
            ReservationOutcome::Fulfilled => ReservationState::Fulfilled,
            ReservationOutcome::Released => ReservationState::Released,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub id: String,
    pub order_id: String,
    pub stock_item_id: String,
    pub quantity: i64,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at < now
    }

    /// Whole minutes until expiry, floored at zero. Dashboard material.
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_active() {
            return 0;
        }
        (self.expires_at - now).num_minutes().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(expires_in: Duration) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: "r-1".into(),
            order_id: "o-1".into(),
            stock_item_id: "si-1".into(),
            quantity: 2,
            state: ReservationState::Active,
            created_at: now,
            expires_at: now + expires_in,
            terminal_at: None,
        }
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        assert!(!reservation(Duration::minutes(10)).is_expired_at(now));
        assert!(reservation(Duration::minutes(-1)).is_expired_at(now));
    }

    #[test]
    fn test_terminal_rows_never_expire() {
        let now = Utc::now();
        let mut r = reservation(Duration::minutes(-30));
        r.state = ReservationState::Released;
        r.terminal_at = Some(now);
        assert!(!r.is_expired_at(now));
        assert_eq!(r.minutes_remaining(now), 0);
    }

    #[test]
    fn test_minutes_remaining_floors_at_zero() {
        let now = Utc::now();
        assert!(reservation(Duration::minutes(14)).minutes_remaining(now) >= 13);
        assert_eq!(reservation(Duration::minutes(-5)).minutes_remaining(now), 0);
    }

    #[test]
    fn test_outcome_maps_to_state() {
        assert_eq!(
            ReservationOutcome::Fulfilled.as_state(),
            ReservationState::Fulfilled
        );
        assert_eq!(
            ReservationOutcome::Released.as_state(),
            ReservationState::Released
        );
    }
}
