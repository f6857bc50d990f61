//! Order rows, line snapshots and status writes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::inventory::ResolvedLine;
use crate::domain::order::{Order, OrderLine, OrderStatus, PaymentStatus, Transition};

/// Checkout payload for a new order row; statuses always start at
/// `(pending_payment, pending)`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub shipping_method_name: String,
    pub shipping_cost: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub customer_notes: Option<String>,
}

pub struct OrderStore;

impl OrderStore {
    pub async fn insert(conn: &mut SqliteConnection, new: NewOrder) -> EngineResult<Order> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let order_number = Order::make_order_number(&id, now);

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, order_number, user_id, guest_email, shipping_address, billing_address,
                 shipping_method_name, shipping_cost, subtotal, total, currency,
                 order_status, payment_status, customer_notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending_payment', 'pending', ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&order_number)
        .bind(&new.user_id)
        .bind(&new.guest_email)
        .bind(new.shipping_address.to_string())
        .bind(new.billing_address.to_string())
        .bind(&new.shipping_method_name)
        .bind(new.shipping_cost.to_string())
        .bind(new.subtotal.to_string())
        .bind(new.total.to_string())
        .bind(&new.currency)
        .bind(&new.customer_notes)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::get(conn, &id.to_string()).await
    }

    pub async fn insert_line(
        conn: &mut SqliteConnection,
        order_id: &str,
        line: &ResolvedLine,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_line
                (order_id, stock_item_id, name, sku, unit_price, quantity, subtotal, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(&line.stock_item_id)
        .bind(&line.name)
        .bind(&line.sku)
        .bind(line.unit_price.to_string())
        .bind(line.quantity)
        .bind(line.subtotal().to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get(conn: &mut SqliteConnection, order_id: &str) -> EngineResult<Order> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| EngineError::not_found("order", order_id))?;
        map_order(&row)
    }

    pub async fn lines(conn: &mut SqliteConnection, order_id: &str) -> EngineResult<Vec<OrderLine>> {
        let rows = sqlx::query("SELECT * FROM order_line WHERE order_id = ? ORDER BY id")
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(map_order_line).collect()
    }

    /// Persist a computed transition: the status pair plus whatever
    /// timestamps the event stamps.
    pub async fn apply_transition(
        conn: &mut SqliteConnection,
        order_id: &str,
        transition: &Transition,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let shipped_at = (transition.order_status == OrderStatus::Shipped).then_some(now);
        let delivered_at = (transition.order_status == OrderStatus::Delivered).then_some(now);

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET order_status = ?1,
                payment_status = ?2,
                tracking_number = COALESCE(?3, tracking_number),
                shipped_at = COALESCE(?4, shipped_at),
                delivered_at = COALESCE(?5, delivered_at),
                updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(transition.order_status.to_string())
        .bind(transition.payment_status.to_string())
        .bind(&transition.tracking_number)
        .bind(shipped_at)
        .bind(delivered_at)
        .bind(now)
        .bind(order_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngineError::not_found("order", order_id));
        }
        Ok(())
    }

    pub async fn list_for_user(
        conn: &mut SqliteConnection,
        user_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(map_order).collect()
    }

    pub async fn count_pending(conn: &mut SqliteConnection) -> EngineResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM orders
            WHERE order_status = 'pending_payment' AND payment_status = 'pending'
            "#,
        )
        .fetch_one(&mut *conn)
        .await?;
        row.try_get("n").map_err(EngineError::Database)
    }

    pub async fn count_created_since(
        conn: &mut SqliteConnection,
        since: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM orders WHERE created_at >= ?")
            .bind(since)
            .fetch_one(&mut *conn)
            .await?;
        row.try_get("n").map_err(EngineError::Database)
    }

    /// Pending orders past the hard timeout with no stock held any more;
    /// the sweep cancels these.
    pub async fn abandoned_pending(
        conn: &mut SqliteConnection,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT o.* FROM orders o
            WHERE o.payment_status = 'pending'
              AND o.created_at < ?
              AND NOT EXISTS (
                  SELECT 1 FROM reservation r
                  WHERE r.order_id = o.id AND r.state = 'active'
              )
            ORDER BY o.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(map_order).collect()
    }

    /// Pending orders inside the pull-reconciliation window whose latest
    /// attempt carries a token, with that token.
    pub async fn pending_for_reconciliation(
        conn: &mut SqliteConnection,
        older_than: DateTime<Utc>,
        newer_than: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<(Order, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT o.*, p.gateway_token AS latest_token
            FROM orders o
            JOIN payment_attempt p ON p.id = (
                SELECT id FROM payment_attempt
                WHERE order_id = o.id
                ORDER BY id DESC
                LIMIT 1
            )
            WHERE o.payment_status = 'pending'
              AND o.created_at < ?
              AND o.created_at >= ?
            ORDER BY o.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(older_than)
        .bind(newer_than)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                let order = map_order(row)?;
                let token: String = row.try_get("latest_token").map_err(EngineError::Database)?;
                Ok((order, token))
            })
            .collect()
    }
}

fn decode_decimal(row: &SqliteRow, column: &str) -> EngineResult<Decimal> {
    let raw: String = row.try_get(column).map_err(EngineError::Database)?;
    Decimal::from_str(&raw).map_err(|e| EngineError::Integrity {
        constraint: format!("unparseable {} {:?}: {}", column, raw, e),
    })
}

fn decode_json(row: &SqliteRow, column: &str) -> EngineResult<serde_json::Value> {
    let raw: String = row.try_get(column).map_err(EngineError::Database)?;
    serde_json::from_str(&raw).map_err(|e| EngineError::Integrity {
        constraint: format!("unparseable {}: {}", column, e),
    })
}

pub(crate) fn map_order(row: &SqliteRow) -> EngineResult<Order> {
    let order_status_str: String = row.try_get("order_status").map_err(EngineError::Database)?;
    let payment_status_str: String = row.try_get("payment_status").map_err(EngineError::Database)?;

    Ok(Order {
        id: row.try_get("id").map_err(EngineError::Database)?,
        order_number: row.try_get("order_number").map_err(EngineError::Database)?,
        user_id: row.try_get("user_id").map_err(EngineError::Database)?,
        guest_email: row.try_get("guest_email").map_err(EngineError::Database)?,
        shipping_address: decode_json(row, "shipping_address")?,
        billing_address: decode_json(row, "billing_address")?,
        shipping_method_name: row
            .try_get("shipping_method_name")
            .map_err(EngineError::Database)?,
        shipping_cost: decode_decimal(row, "shipping_cost")?,
        subtotal: decode_decimal(row, "subtotal")?,
        total: decode_decimal(row, "total")?,
        currency: row.try_get("currency").map_err(EngineError::Database)?,
        order_status: OrderStatus::from_str(&order_status_str).map_err(|e| {
            EngineError::Integrity {
                constraint: e.to_string(),
            }
        })?,
        payment_status: PaymentStatus::from_str(&payment_status_str).map_err(|e| {
            EngineError::Integrity {
                constraint: e.to_string(),
            }
        })?,
        customer_notes: row.try_get("customer_notes").map_err(EngineError::Database)?,
        tracking_number: row.try_get("tracking_number").map_err(EngineError::Database)?,
        shipped_at: row.try_get("shipped_at").map_err(EngineError::Database)?,
        delivered_at: row.try_get("delivered_at").map_err(EngineError::Database)?,
        created_at: row.try_get("created_at").map_err(EngineError::Database)?,
        updated_at: row.try_get("updated_at").map_err(EngineError::Database)?,
    })
}

fn map_order_line(row: &SqliteRow) -> EngineResult<OrderLine> {
    Ok(OrderLine {
        id: row.try_get("id").map_err(EngineError::Database)?,
        order_id: row.try_get("order_id").map_err(EngineError::Database)?,
        stock_item_id: row.try_get("stock_item_id").map_err(EngineError::Database)?,
        name: row.try_get("name").map_err(EngineError::Database)?,
        sku: row.try_get("sku").map_err(EngineError::Database)?,
        unit_price: decode_decimal(row, "unit_price")?,
        quantity: row.try_get("quantity").map_err(EngineError::Database)?,
        subtotal: decode_decimal(row, "subtotal")?,
    })
}
