//! Reservation rows and the composite operations over them.
//!
//! `terminate` is the single idempotency point for the whole engine: its
//! guarded UPDATE decides exactly once which caller performs the ledger
//! mutation, so duplicate webhooks, racing admin actions and the sweep all
//! collapse to one terminal effect per reservation.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult, LineDeficit};
use crate::domain::inventory::ResolvedLine;
use crate::domain::reservation::{Reservation, ReservationOutcome, ReservationState};
use crate::infrastructure::persistence::stock_ledger::{ReserveOutcome, StockLedger};

/// Whether a terminate call performed the terminal transition or found it
/// already done. Either way the recorded state is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Applied(ReservationState),
    NoOp(ReservationState),
}

pub struct ReservationStore;

impl ReservationStore {
    /// Reserve every line of an order, all-or-nothing.
    ///
    /// Lines are processed in ascending stock-item id order so concurrent
    /// batches take row locks in a stable sequence. Every line is
    /// attempted even after a deficit, so the failure report covers the
    /// whole batch; the caller rolls the transaction back on error, which
    /// also discards the partial ledger increments made here.
    pub async fn reserve_batch(
        conn: &mut SqliteConnection,
        order_id: &str,
        lines: &[ResolvedLine],
        ttl: Duration,
    ) -> EngineResult<Vec<Reservation>> {
        let mut ordered: Vec<&ResolvedLine> = lines.iter().collect();
        ordered.sort_by(|a, b| a.stock_item_id.cmp(&b.stock_item_id));

        let mut failures: Vec<LineDeficit> = Vec::new();
        let mut reserved: Vec<(&ResolvedLine, DateTime<Utc>)> = Vec::new();
        let now = Utc::now();

        for line in ordered {
            match StockLedger::try_reserve(conn, &line.stock_item_id, line.quantity).await? {
                ReserveOutcome::Reserved => reserved.push((line, now + ttl)),
                ReserveOutcome::Insufficient { available } => failures.push(LineDeficit {
                    stock_item_id: line.stock_item_id.clone(),
                    name: line.name.clone(),
                    requested: line.quantity,
                    available,
                }),
            }
        }

        if !failures.is_empty() {
            return Err(EngineError::InsufficientStock { failures });
        }

        let mut out = Vec::with_capacity(reserved.len());
        for (line, expires_at) in reserved {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO reservation
                    (id, order_id, stock_item_id, quantity, state, created_at, expires_at)
                VALUES (?, ?, ?, ?, 'active', ?, ?)
                "#,
            )
            .bind(&id)
            .bind(order_id)
            .bind(&line.stock_item_id)
            .bind(line.quantity)
            .bind(now)
            .bind(expires_at)
            .execute(&mut *conn)
            .await?;

            out.push(Reservation {
                id,
                order_id: order_id.to_string(),
                stock_item_id: line.stock_item_id.clone(),
                quantity: line.quantity,
                state: ReservationState::Active,
                created_at: now,
                expires_at,
                terminal_at: None,
            });
        }

        Ok(out)
    }

    /// Terminate one reservation, exactly once.
    ///
    /// The guarded UPDATE runs before anything else in this call: whichever
    /// transaction flips the row off `active` owns the ledger mutation.
    /// A replay finds the row already terminal and returns the recorded
    /// outcome without touching the ledger.
    pub async fn terminate(
        conn: &mut SqliteConnection,
        reservation_id: &str,
        outcome: ReservationOutcome,
    ) -> EngineResult<Termination> {
        let target = outcome.as_state();
        let updated = sqlx::query(
            r#"
            UPDATE reservation
            SET state = ?1, terminal_at = ?2
            WHERE id = ?3 AND state = 'active'
            "#,
        )
        .bind(target.to_string())
        .bind(Utc::now())
        .bind(reservation_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            // Already terminal (or unknown): report what is recorded.
            let row = sqlx::query("SELECT state FROM reservation WHERE id = ?")
                .bind(reservation_id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
            let state_str: String = row.try_get("state").map_err(EngineError::Database)?;
            let state =
                ReservationState::from_str(&state_str).map_err(|e| EngineError::Integrity {
                    constraint: e.to_string(),
                })?;
            return Ok(Termination::NoOp(state));
        }

        let row = sqlx::query("SELECT stock_item_id, quantity FROM reservation WHERE id = ?")
            .bind(reservation_id)
            .fetch_one(&mut *conn)
            .await?;
        let stock_item_id: String = row.try_get("stock_item_id").map_err(EngineError::Database)?;
        let quantity: i64 = row.try_get("quantity").map_err(EngineError::Database)?;

        match outcome {
            ReservationOutcome::Fulfilled => {
                StockLedger::fulfill(conn, &stock_item_id, quantity).await?
            }
            ReservationOutcome::Released => {
                StockLedger::release(conn, &stock_item_id, quantity).await?
            }
        }

        Ok(Termination::Applied(target))
    }

    /// Terminate every ACTIVE reservation of one order under the caller's
    /// transaction. Returns how many rows actually flipped.
    pub async fn terminate_order(
        conn: &mut SqliteConnection,
        order_id: &str,
        outcome: ReservationOutcome,
    ) -> EngineResult<usize> {
        let ids: Vec<String> = {
            let rows = sqlx::query(
                "SELECT id FROM reservation WHERE order_id = ? AND state = 'active' ORDER BY stock_item_id",
            )
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
            rows.iter()
                .map(|r| r.try_get("id").map_err(EngineError::Database))
                .collect::<EngineResult<_>>()?
        };

        let mut flipped = 0;
        for id in &ids {
            if let Termination::Applied(_) = Self::terminate(conn, id, outcome).await? {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    pub async fn get(conn: &mut SqliteConnection, id: &str) -> EngineResult<Reservation> {
        let row = sqlx::query("SELECT * FROM reservation WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        map_reservation(&row)
    }

    pub async fn for_order(
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query("SELECT * FROM reservation WHERE order_id = ? ORDER BY created_at")
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(map_reservation).collect()
    }

    pub async fn count_active_for_order(
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM reservation WHERE order_id = ? AND state = 'active'",
        )
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;
        row.try_get("n").map_err(EngineError::Database)
    }

    /// Next batch of expired ACTIVE reservations whose order never left the
    /// unpaid path, oldest expiry first.
    pub async fn expired_batch(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM reservation r
            JOIN orders o ON o.id = r.order_id
            WHERE r.state = 'active'
              AND r.expires_at < ?
              AND o.payment_status IN ('pending', 'failed', 'cancelled')
            ORDER BY r.expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(map_reservation).collect()
    }

    /// ACTIVE reservations left behind on orders that reached a terminal
    /// payment status without the reconciler cleaning up.
    pub async fn orphaned_active(
        conn: &mut SqliteConnection,
        limit: usize,
    ) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM reservation r
            JOIN orders o ON o.id = r.order_id
            WHERE r.state = 'active' AND o.payment_status <> 'pending'
            ORDER BY r.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(map_reservation).collect()
    }

    pub async fn active_for_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM reservation r
            JOIN orders o ON o.id = r.order_id
            WHERE r.state = 'active' AND o.user_id = ?
            ORDER BY r.expires_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(map_reservation).collect()
    }

    pub async fn count_active(conn: &mut SqliteConnection) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM reservation WHERE state = 'active'")
            .fetch_one(&mut *conn)
            .await?;
        row.try_get("n").map_err(EngineError::Database)
    }

    pub async fn count_active_expired(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM reservation WHERE state = 'active' AND expires_at < ?",
        )
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        row.try_get("n").map_err(EngineError::Database)
    }

    /// Active-quantity sum per stock item; must always equal the ledger's
    /// `reserved` column.
    pub async fn active_quantity_for_item(
        conn: &mut SqliteConnection,
        stock_item_id: &str,
    ) -> EngineResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0) AS total FROM reservation
            WHERE stock_item_id = ? AND state = 'active'
            "#,
        )
        .bind(stock_item_id)
        .fetch_one(&mut *conn)
        .await?;
        row.try_get("total").map_err(EngineError::Database)
    }
}

pub(crate) fn map_reservation(row: &SqliteRow) -> EngineResult<Reservation> {
    let state_str: String = row.try_get("state").map_err(EngineError::Database)?;
    let state = ReservationState::from_str(&state_str).map_err(|e| EngineError::Integrity {
        constraint: e.to_string(),
    })?;

    Ok(Reservation {
        id: row.try_get("id").map_err(EngineError::Database)?,
        order_id: row.try_get("order_id").map_err(EngineError::Database)?,
        stock_item_id: row.try_get("stock_item_id").map_err(EngineError::Database)?,
        quantity: row.try_get("quantity").map_err(EngineError::Database)?,
        state,
        created_at: row.try_get("created_at").map_err(EngineError::Database)?,
        expires_at: row.try_get("expires_at").map_err(EngineError::Database)?,
        terminal_at: row.try_get("terminal_at").map_err(EngineError::Database)?,
    })
}
