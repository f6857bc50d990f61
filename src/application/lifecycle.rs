//! Applies lifecycle events to orders: transition plus reservation side
//! effect plus status write, all inside one transaction. Partial completion
//! is impossible; a guard miss is a reported no-op, never an error, so
//! every caller may replay safely.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::order::{LifecycleEvent, Order, ReservationEffect};
use crate::domain::reservation::ReservationOutcome;
use crate::infrastructure::persistence::orders::OrderStore;
use crate::infrastructure::persistence::reservations::ReservationStore;

/// Result of feeding one event through the state machine.
#[derive(Debug, Clone)]
pub struct AppliedEvent {
    /// Order as it stands after the call (unchanged on a no-op).
    pub order: Order,
    /// False when the guard did not match and nothing was written.
    pub applied: bool,
    /// Reservations terminated by the side effect.
    pub reservations_touched: usize,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    pool: SqlitePool,
}

impl OrderLifecycle {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply an event in its own transaction.
    pub async fn apply(&self, order_id: &str, event: &LifecycleEvent) -> EngineResult<AppliedEvent> {
        let mut tx = self.pool.begin().await?;
        let result = Self::apply_in(&mut tx, order_id, event).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Apply an event on a caller-owned connection, for callers that need
    /// the transition atomic with their own writes (the reconciler's
    /// attempt updates).
    pub async fn apply_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        event: &LifecycleEvent,
    ) -> EngineResult<AppliedEvent> {
        let order = OrderStore::get(conn, order_id).await?;
        let active = ReservationStore::count_active_for_order(conn, order_id).await?;

        let Some(transition) = order.transition(event, active) else {
            info!(
                "Event {} is a no-op for order {} at ({}, {})",
                event.name(),
                order.order_number,
                order.order_status,
                order.payment_status
            );
            return Ok(AppliedEvent {
                order,
                applied: false,
                reservations_touched: 0,
            });
        };

        let reservations_touched = match transition.effect {
            ReservationEffect::FulfillActive => {
                ReservationStore::terminate_order(conn, order_id, ReservationOutcome::Fulfilled)
                    .await?
            }
            ReservationEffect::ReleaseActive => {
                ReservationStore::terminate_order(conn, order_id, ReservationOutcome::Released)
                    .await?
            }
            ReservationEffect::None => 0,
        };

        OrderStore::apply_transition(conn, order_id, &transition).await?;
        let order = OrderStore::get(conn, order_id).await?;

        info!(
            "Order {}: {} -> ({}, {}), {} reservation(s) terminated",
            order.order_number,
            event.name(),
            order.order_status,
            order.payment_status,
            reservations_touched
        );

        Ok(AppliedEvent {
            order,
            applied: true,
            reservations_touched,
        })
    }

    /// Like [`apply`], but a guard miss is the caller's bug.
    pub async fn apply_strict(
        &self,
        order_id: &str,
        event: &LifecycleEvent,
    ) -> EngineResult<AppliedEvent> {
        let applied = self.apply(order_id, event).await?;
        if !applied.applied {
            return Err(EngineError::StateGuard {
                event: event.name().to_string(),
                order_status: applied.order.order_status.to_string(),
                payment_status: applied.order.payment_status.to_string(),
            });
        }
        Ok(applied)
    }
}
