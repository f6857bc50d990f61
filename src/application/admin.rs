//! Admin read models and bulk write operations.
//!
//! Bulk writes drive the same state machine as the automatic paths; a
//! guard miss skips that order with a reason instead of aborting the batch.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::application::lifecycle::{AppliedEvent, OrderLifecycle};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::inventory::StockItem;
use crate::domain::order::{LifecycleEvent, Order, OrderLine, PaymentStatus};
use crate::domain::payment::PaymentAttempt;
use crate::domain::reservation::{Reservation, ReservationOutcome};
use crate::infrastructure::persistence::orders::OrderStore;
use crate::infrastructure::persistence::reservations::ReservationStore;
use crate::infrastructure::persistence::stock_ledger::StockLedger;
use crate::infrastructure::persistence::sweep_log::{SweepLog, SweepRun};

#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardCounters {
    pub active_reservations: i64,
    pub currently_expired: i64,
    pub total_reserved_units: i64,
    pub pending_orders: i64,
    pub orders_last_24h: i64,
    pub last_sweep: Option<SweepRun>,
}

/// A reservation with the countdown the dashboard shows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub minutes_remaining: i64,
}

#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub reservations: Vec<ReservationView>,
    pub attempts: Vec<PaymentAttempt>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkSkip {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub skipped: Vec<BulkSkip>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StockAdjustment {
    pub stock_item_id: String,
    pub delta: i64,
}

pub struct AdminService {
    pool: SqlitePool,
    lifecycle: OrderLifecycle,
}

impl AdminService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            lifecycle: OrderLifecycle::new(pool.clone()),
            pool,
        }
    }

    pub async fn dashboard(&self) -> EngineResult<DashboardCounters> {
        let mut conn = self.pool.acquire().await?;
        let now = Utc::now();
        Ok(DashboardCounters {
            active_reservations: ReservationStore::count_active(&mut conn).await?,
            currently_expired: ReservationStore::count_active_expired(&mut conn, now).await?,
            total_reserved_units: StockLedger::total_reserved(&mut conn).await?,
            pending_orders: OrderStore::count_pending(&mut conn).await?,
            orders_last_24h: OrderStore::count_created_since(
                &mut conn,
                now - chrono::Duration::hours(24),
            )
            .await?,
            last_sweep: SweepLog::latest(&mut conn).await?,
        })
    }

    pub async fn low_stock(&self) -> EngineResult<Vec<StockItem>> {
        let mut conn = self.pool.acquire().await?;
        StockLedger::low_stock(&mut conn).await
    }

    pub async fn order_detail(&self, order_id: &str) -> EngineResult<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        let order = OrderStore::get(&mut conn, order_id).await?;
        let lines = OrderStore::lines(&mut conn, order_id).await?;
        let reservations = ReservationStore::for_order(&mut conn, order_id).await?;
        let attempts =
            crate::infrastructure::persistence::payments::PaymentStore::for_order(&mut conn, order_id)
                .await?;

        let now = Utc::now();
        Ok(OrderDetail {
            order,
            lines,
            reservations: reservations
                .into_iter()
                .map(|r| ReservationView {
                    minutes_remaining: r.minutes_remaining(now),
                    reservation: r,
                })
                .collect(),
            attempts,
        })
    }

    pub async fn active_reservations_for_user(
        &self,
        user_id: &str,
    ) -> EngineResult<Vec<ReservationView>> {
        let mut conn = self.pool.acquire().await?;
        let now = Utc::now();
        Ok(ReservationStore::active_for_user(&mut conn, user_id)
            .await?
            .into_iter()
            .map(|r| ReservationView {
                minutes_remaining: r.minutes_remaining(now),
                reservation: r,
            })
            .collect())
    }

    /// Mark a paid, processing order as shipped. Unlike the replayable
    /// gateway paths, a guard miss here is the operator's bug and comes
    /// back as an error.
    pub async fn ship_order(
        &self,
        order_id: &str,
        tracking_number: String,
    ) -> EngineResult<AppliedEvent> {
        self.lifecycle
            .apply_strict(order_id, &LifecycleEvent::AdminShip { tracking_number })
            .await
    }

    /// Mark a shipped order as delivered.
    pub async fn deliver_order(&self, order_id: &str) -> EngineResult<AppliedEvent> {
        self.lifecycle
            .apply_strict(order_id, &LifecycleEvent::AdminDeliver)
            .await
    }

    /// Cancel a set of orders through `admin_cancel`; guard misses are
    /// reported per order.
    pub async fn bulk_cancel(&self, order_ids: &[String]) -> EngineResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for order_id in order_ids {
            match self.lifecycle.apply(order_id, &LifecycleEvent::AdminCancel).await {
                Ok(applied) if applied.applied => outcome.succeeded.push(order_id.clone()),
                Ok(applied) => outcome.skipped.push(BulkSkip {
                    id: order_id.clone(),
                    reason: format!(
                        "not cancellable from ({}, {})",
                        applied.order.order_status, applied.order.payment_status
                    ),
                }),
                Err(EngineError::NotFound { .. }) => outcome.skipped.push(BulkSkip {
                    id: order_id.clone(),
                    reason: "order not found".into(),
                }),
                Err(e) => return Err(e),
            }
        }
        info!(
            "Bulk cancel: {} cancelled, {} skipped",
            outcome.succeeded.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Fulfil leftover ACTIVE reservations of orders that are already PAID;
    /// the repair half of the success path, nothing else.
    pub async fn bulk_fulfill(&self, order_ids: &[String]) -> EngineResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for order_id in order_ids {
            let mut tx = self.pool.begin().await?;
            let order = match OrderStore::get(&mut tx, order_id).await {
                Ok(order) => order,
                Err(EngineError::NotFound { .. }) => {
                    outcome.skipped.push(BulkSkip {
                        id: order_id.clone(),
                        reason: "order not found".into(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if order.payment_status != PaymentStatus::Paid {
                outcome.skipped.push(BulkSkip {
                    id: order_id.clone(),
                    reason: format!("payment status is {}, not paid", order.payment_status),
                });
                continue;
            }

            ReservationStore::terminate_order(&mut tx, order_id, ReservationOutcome::Fulfilled)
                .await?;
            tx.commit().await?;
            outcome.succeeded.push(order_id.clone());
        }
        info!(
            "Bulk fulfill: {} fulfilled, {} skipped",
            outcome.succeeded.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Ledger adjustments, one transaction per item so a bad row does not
    /// take the batch down with it.
    pub async fn bulk_adjust(&self, adjustments: &[StockAdjustment]) -> EngineResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for adjustment in adjustments {
            let mut tx = self.pool.begin().await?;
            match StockLedger::adjust(&mut tx, &adjustment.stock_item_id, adjustment.delta).await {
                Ok(item) => {
                    tx.commit().await?;
                    info!(
                        "Adjusted {} by {} (on_hand now {})",
                        item.sku, adjustment.delta, item.on_hand
                    );
                    outcome.succeeded.push(adjustment.stock_item_id.clone());
                }
                Err(EngineError::NotFound { .. }) => {
                    outcome.skipped.push(BulkSkip {
                        id: adjustment.stock_item_id.clone(),
                        reason: "stock item not found".into(),
                    });
                }
                Err(EngineError::Integrity { constraint }) => {
                    outcome.skipped.push(BulkSkip {
                        id: adjustment.stock_item_id.clone(),
                        reason: format!("adjustment rejected: {}", constraint),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}
