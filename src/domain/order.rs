//! Order aggregate and its lifecycle state machine.
//!
//! An order carries two orthogonal statuses. Transitions are a pure table:
//! handlers and the scheduler feed events in, the application layer persists
//! the resulting statuses together with the reservation side effect in one
//! transaction. An event whose guard does not match the current state is a
//! no-op, which is what makes every terminal transition replay-safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Failed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            "failed" => Ok(OrderStatus::Failed),
            _ => anyhow::bail!("Invalid order status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    RefundedPartial,
    RefundedFull,
}

impl PaymentStatus {
    /// Every status except `Pending` is terminal for the payment leg.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::RefundedPartial => "refunded_partial",
            PaymentStatus::RefundedFull => "refunded_full",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded_partial" => Ok(PaymentStatus::RefundedPartial),
            "refunded_full" => Ok(PaymentStatus::RefundedFull),
            _ => anyhow::bail!("Invalid payment status: {}", s),
        }
    }
}

/// Events that drive the state machine. HTTP handlers, the reconciler and
/// the scheduler all funnel through the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCancelled,
    ReservationExpired,
    AdminCancel,
    AdminShip { tracking_number: String },
    AdminDeliver,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::PaymentSucceeded => "payment_succeeded",
            LifecycleEvent::PaymentFailed => "payment_failed",
            LifecycleEvent::PaymentCancelled => "payment_cancelled",
            LifecycleEvent::ReservationExpired => "reservation_expired",
            LifecycleEvent::AdminCancel => "admin_cancel",
            LifecycleEvent::AdminShip { .. } => "admin_ship",
            LifecycleEvent::AdminDeliver => "admin_deliver",
        }
    }
}

/// What to do with the order's ACTIVE reservations alongside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationEffect {
    None,
    FulfillActive,
    ReleaseActive,
}

/// The computed outcome of applying an event to the current status pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub effect: ReservationEffect,
    pub tracking_number: Option<String>,
}

/// Line snapshot captured at checkout. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: String,
    pub stock_item_id: String,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub shipping_method_name: String,
    pub shipping_cost: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub customer_notes: Option<String>,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Public-facing order number: creation date plus the first 8 hex of
    /// the order id, e.g. `ORD-20260801-9F2C41AB`.
    pub fn make_order_number(id: &Uuid, created_at: DateTime<Utc>) -> String {
        let head: String = id
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
            .to_uppercase();
        format!("ORD-{}-{}", created_at.format("%Y%m%d"), head)
    }

    pub fn is_terminal(&self) -> bool {
        self.order_status.is_terminal() && self.payment_status.is_terminal()
    }

    /// The §4.C transition table. `active_reservations` feeds the
    /// `reservation_expired` guard; everything else is decided from the
    /// status pair alone. `None` means the guard did not match: callers
    /// treat that as an idempotent no-op.
    pub fn transition(&self, event: &LifecycleEvent, active_reservations: i64) -> Option<Transition> {
        match event {
            LifecycleEvent::PaymentSucceeded => {
                (self.payment_status == PaymentStatus::Pending).then(|| Transition {
                    order_status: OrderStatus::Processing,
                    payment_status: PaymentStatus::Paid,
                    effect: ReservationEffect::FulfillActive,
                    tracking_number: None,
                })
            }
            LifecycleEvent::PaymentFailed => {
                (self.payment_status == PaymentStatus::Pending).then(|| Transition {
                    order_status: OrderStatus::Failed,
                    payment_status: PaymentStatus::Failed,
                    effect: ReservationEffect::ReleaseActive,
                    tracking_number: None,
                })
            }
            LifecycleEvent::PaymentCancelled => {
                (self.payment_status == PaymentStatus::Pending).then(|| Transition {
                    order_status: OrderStatus::Cancelled,
                    payment_status: PaymentStatus::Cancelled,
                    effect: ReservationEffect::ReleaseActive,
                    tracking_number: None,
                })
            }
            LifecycleEvent::ReservationExpired => {
                (self.payment_status == PaymentStatus::Pending && active_reservations == 0).then(
                    || Transition {
                        order_status: OrderStatus::Cancelled,
                        payment_status: PaymentStatus::Cancelled,
                        effect: ReservationEffect::None,
                        tracking_number: None,
                    },
                )
            }
            LifecycleEvent::AdminCancel => matches!(
                self.order_status,
                OrderStatus::PendingPayment | OrderStatus::Processing
            )
            .then(|| {
                let payment_status = match self.payment_status {
                    PaymentStatus::Pending => PaymentStatus::Cancelled,
                    PaymentStatus::Paid => PaymentStatus::RefundedFull,
                    other => other,
                };
                Transition {
                    order_status: OrderStatus::Cancelled,
                    payment_status,
                    effect: ReservationEffect::ReleaseActive,
                    tracking_number: None,
                }
            }),
            LifecycleEvent::AdminShip { tracking_number } => (self.payment_status
                == PaymentStatus::Paid
                && self.order_status == OrderStatus::Processing)
                .then(|| Transition {
                    order_status: OrderStatus::Shipped,
                    payment_status: PaymentStatus::Paid,
                    effect: ReservationEffect::None,
                    tracking_number: Some(tracking_number.clone()),
                }),
            LifecycleEvent::AdminDeliver => {
                (self.order_status == OrderStatus::Shipped).then(|| Transition {
                    order_status: OrderStatus::Delivered,
                    payment_status: PaymentStatus::Paid,
                    effect: ReservationEffect::None,
                    tracking_number: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(order_status: OrderStatus, payment_status: PaymentStatus) -> Order {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Order {
            id: id.to_string(),
            order_number: Order::make_order_number(&id, now),
            user_id: None,
            guest_email: Some("guest@example.com".into()),
            shipping_address: serde_json::json!({"city": "Minsk"}),
            billing_address: serde_json::json!({"city": "Minsk"}),
            shipping_method_name: "Standard".into(),
            shipping_cost: dec!(4.90),
            subtotal: dec!(99.80),
            total: dec!(104.70),
            currency: "EUR".into(),
            order_status,
            payment_status,
            customer_notes: None,
            tracking_number: None,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_order_number_format() {
        let id = Uuid::parse_str("9f2c41ab-0000-4000-8000-000000000000").unwrap();
        let at = "2026-08-01T10:00:00Z".parse().unwrap();
        assert_eq!(Order::make_order_number(&id, at), "ORD-20260801-9F2C41AB");
    }

    #[test]
    fn test_payment_succeeded_from_pending() {
        let o = order(OrderStatus::PendingPayment, PaymentStatus::Pending);
        let t = o.transition(&LifecycleEvent::PaymentSucceeded, 2).unwrap();
        assert_eq!(t.order_status, OrderStatus::Processing);
        assert_eq!(t.payment_status, PaymentStatus::Paid);
        assert_eq!(t.effect, ReservationEffect::FulfillActive);
    }

    #[test]
    fn test_terminal_events_are_noops_when_replayed() {
        // Applying a terminal transition to an already-terminal order
        // changes nothing.
        let paid = order(OrderStatus::Processing, PaymentStatus::Paid);
        assert!(paid.transition(&LifecycleEvent::PaymentSucceeded, 0).is_none());
        assert!(paid.transition(&LifecycleEvent::PaymentFailed, 0).is_none());

        let failed = order(OrderStatus::Failed, PaymentStatus::Failed);
        assert!(failed.transition(&LifecycleEvent::PaymentCancelled, 0).is_none());
        assert!(failed.transition(&LifecycleEvent::ReservationExpired, 0).is_none());
    }

    #[test]
    fn test_reservation_expired_requires_no_active_reservations() {
        let o = order(OrderStatus::PendingPayment, PaymentStatus::Pending);
        assert!(o.transition(&LifecycleEvent::ReservationExpired, 1).is_none());

        let t = o.transition(&LifecycleEvent::ReservationExpired, 0).unwrap();
        assert_eq!(t.order_status, OrderStatus::Cancelled);
        assert_eq!(t.payment_status, PaymentStatus::Cancelled);
        assert_eq!(t.effect, ReservationEffect::None);
    }

    #[test]
    fn test_admin_cancel_of_paid_order_marks_full_refund() {
        let o = order(OrderStatus::Processing, PaymentStatus::Paid);
        let t = o.transition(&LifecycleEvent::AdminCancel, 0).unwrap();
        assert_eq!(t.order_status, OrderStatus::Cancelled);
        assert_eq!(t.payment_status, PaymentStatus::RefundedFull);
        assert_eq!(t.effect, ReservationEffect::ReleaseActive);
    }

    #[test]
    fn test_admin_cancel_guard_rejects_shipped() {
        let o = order(OrderStatus::Shipped, PaymentStatus::Paid);
        assert!(o.transition(&LifecycleEvent::AdminCancel, 0).is_none());
    }

    #[test]
    fn test_ship_then_deliver() {
        let o = order(OrderStatus::Processing, PaymentStatus::Paid);
        let t = o
            .transition(
                &LifecycleEvent::AdminShip {
                    tracking_number: "BY123456".into(),
                },
                0,
            )
            .unwrap();
        assert_eq!(t.order_status, OrderStatus::Shipped);
        assert_eq!(t.tracking_number.as_deref(), Some("BY123456"));

        let shipped = order(OrderStatus::Shipped, PaymentStatus::Paid);
        let t = shipped.transition(&LifecycleEvent::AdminDeliver, 0).unwrap();
        assert_eq!(t.order_status, OrderStatus::Delivered);
    }

    #[test]
    fn test_ship_guard_requires_paid_processing() {
        let o = order(OrderStatus::PendingPayment, PaymentStatus::Pending);
        assert!(
            o.transition(
                &LifecycleEvent::AdminShip {
                    tracking_number: "X".into()
                },
                0
            )
            .is_none()
        );
    }

    #[test]
    fn test_status_round_trip_strings() {
        for s in [
            OrderStatus::PendingPayment,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
            OrderStatus::Failed,
        ] {
            assert_eq!(s.to_string().parse::<OrderStatus>().unwrap(), s);
        }
        for p in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::RefundedPartial,
            PaymentStatus::RefundedFull,
        ] {
            assert_eq!(p.to_string().parse::<PaymentStatus>().unwrap(), p);
        }
    }
}
