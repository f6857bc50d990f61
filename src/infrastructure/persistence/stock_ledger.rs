//! Per-SKU stock counters and their transactional mutators.
//!
//! Every mutator is a single guarded UPDATE executed on the caller's
//! connection, so the read-verify-write happens atomically inside the
//! statement and the row never exists as shared mutable state in process
//! memory. Callers own transaction scope; the ledger never begins or
//! commits one itself.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::inventory::{StockItem, StockKind};

/// Result of a guarded reserve. `Insufficient` carries the availability
/// observed after the update declined, for the error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    Insufficient { available: i64 },
}

/// Catalogue-import payload for a new ledger row.
#[derive(Debug, Clone)]
pub struct NewStockItem {
    pub kind: StockKind,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub sku: String,
    pub display_name: String,
    pub unit_price: Decimal,
    pub currency: String,
    pub on_hand: i64,
    pub low_threshold: i64,
    pub drop_starts_at: Option<DateTime<Utc>>,
    pub drop_ends_at: Option<DateTime<Utc>>,
}

pub struct StockLedger;

impl StockLedger {
    pub async fn insert(conn: &mut SqliteConnection, new: NewStockItem) -> EngineResult<StockItem> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO stock_item
                (id, kind, product_id, variant_id, sku, display_name, unit_price, currency,
                 on_hand, reserved, low_threshold, drop_starts_at, drop_ends_at, is_archived,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new.kind.to_string())
        .bind(new.product_id)
        .bind(new.variant_id)
        .bind(&new.sku)
        .bind(&new.display_name)
        .bind(new.unit_price.to_string())
        .bind(&new.currency)
        .bind(new.on_hand)
        .bind(new.low_threshold)
        .bind(new.drop_starts_at)
        .bind(new.drop_ends_at)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::get(conn, &id).await
    }

    pub async fn get(conn: &mut SqliteConnection, item_id: &str) -> EngineResult<StockItem> {
        let row = sqlx::query("SELECT * FROM stock_item WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| EngineError::not_found("stock item", item_id))?;
        map_stock_item(&row)
    }

    /// Reserve `qty` units if available. The WHERE clause is the oversell
    /// guard: zero rows affected means availability was short at the moment
    /// the row lock was held.
    pub async fn try_reserve(
        conn: &mut SqliteConnection,
        item_id: &str,
        qty: i64,
    ) -> EngineResult<ReserveOutcome> {
        ensure_positive(qty)?;
        let updated = sqlx::query(
            r#"
            UPDATE stock_item
            SET reserved = reserved + ?1, updated_at = ?2
            WHERE id = ?3 AND is_archived = 0 AND on_hand - reserved >= ?1
            "#,
        )
        .bind(qty)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(ReserveOutcome::Reserved);
        }

        let item = Self::get(conn, item_id).await?;
        Ok(ReserveOutcome::Insufficient {
            available: item.available().max(0),
        })
    }

    /// Return `qty` units to availability. The MAX(0, ..) clamp is a
    /// defensive floor; callers guarantee single invocation per
    /// reservation termination.
    pub async fn release(
        conn: &mut SqliteConnection,
        item_id: &str,
        qty: i64,
    ) -> EngineResult<()> {
        ensure_positive(qty)?;
        let updated = sqlx::query(
            r#"
            UPDATE stock_item
            SET reserved = MAX(0, reserved - ?1), updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(qty)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngineError::not_found("stock item", item_id));
        }
        Ok(())
    }

    /// Convert `qty` reserved units into a permanent decrement: both
    /// counters drop in one statement.
    pub async fn fulfill(
        conn: &mut SqliteConnection,
        item_id: &str,
        qty: i64,
    ) -> EngineResult<()> {
        ensure_positive(qty)?;
        let updated = sqlx::query(
            r#"
            UPDATE stock_item
            SET reserved = MAX(0, reserved - ?1),
                on_hand = MAX(0, on_hand - ?1),
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(qty)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngineError::not_found("stock item", item_id));
        }
        Ok(())
    }

    /// Admin stock correction. Reconciles `reserved` against the ACTIVE
    /// reservation sum first, then applies the on-hand delta; if the
    /// result would undercut outstanding holds the table CHECK fires and
    /// the caller's transaction rolls back.
    pub async fn adjust(
        conn: &mut SqliteConnection,
        item_id: &str,
        delta: i64,
    ) -> EngineResult<StockItem> {
        sqlx::query(
            r#"
            UPDATE stock_item
            SET reserved = (
                    SELECT COALESCE(SUM(quantity), 0) FROM reservation
                    WHERE stock_item_id = ?1 AND state = 'active'
                ),
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(item_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE stock_item
            SET on_hand = MAX(0, on_hand + ?1), updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(delta)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(EngineError::not_found("stock item", item_id));
        }
        Self::get(conn, item_id).await
    }

    /// Admin archival; legal only once nothing is held against the row.
    pub async fn archive(conn: &mut SqliteConnection, item_id: &str) -> EngineResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_item
            SET is_archived = 1, updated_at = ?1
            WHERE id = ?2 AND reserved = 0
            "#,
        )
        .bind(Utc::now())
        .bind(item_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            let item = Self::get(conn, item_id).await?;
            return Err(EngineError::validation(format!(
                "cannot archive {}: {} unit(s) still reserved",
                item.sku, item.reserved
            )));
        }
        Ok(())
    }

    /// The drop allocation currently open for a product, if any. Checkout
    /// resolution prefers this over the variant's standing stock.
    pub async fn find_open_drop(
        conn: &mut SqliteConnection,
        product_id: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StockItem>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM stock_item
            WHERE kind = 'drop' AND product_id = ? AND is_archived = 0
              AND (drop_starts_at IS NULL OR drop_starts_at <= ?)
              AND (drop_ends_at IS NULL OR drop_ends_at > ?)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(map_stock_item).transpose()
    }

    pub async fn find_variant(
        conn: &mut SqliteConnection,
        variant_id: i64,
    ) -> EngineResult<Option<StockItem>> {
        let row = sqlx::query(
            "SELECT * FROM stock_item WHERE kind = 'variant' AND variant_id = ? AND is_archived = 0",
        )
        .bind(variant_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(map_stock_item).transpose()
    }

    /// Items at or below their low-stock threshold, most starved first.
    pub async fn low_stock(conn: &mut SqliteConnection) -> EngineResult<Vec<StockItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stock_item
            WHERE is_archived = 0 AND on_hand - reserved <= low_threshold
            ORDER BY on_hand - reserved ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(map_stock_item).collect()
    }

    pub async fn total_reserved(conn: &mut SqliteConnection) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(reserved), 0) AS total FROM stock_item")
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.try_get("total").map_err(EngineError::Database)?)
    }
}

fn ensure_positive(qty: i64) -> EngineResult<()> {
    if qty <= 0 {
        return Err(EngineError::validation(format!(
            "quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}

pub(crate) fn map_stock_item(row: &SqliteRow) -> EngineResult<StockItem> {
    let kind_str: String = row.try_get("kind").map_err(EngineError::Database)?;
    let kind = StockKind::from_str(&kind_str)
        .map_err(|e| EngineError::Integrity {
            constraint: e.to_string(),
        })?;
    let price_str: String = row.try_get("unit_price").map_err(EngineError::Database)?;
    let unit_price = Decimal::from_str(&price_str).map_err(|e| EngineError::Integrity {
        constraint: format!("unparseable unit_price {:?}: {}", price_str, e),
    })?;

    Ok(StockItem {
        id: row.try_get("id").map_err(EngineError::Database)?,
        kind,
        product_id: row.try_get("product_id").map_err(EngineError::Database)?,
        variant_id: row.try_get("variant_id").map_err(EngineError::Database)?,
        sku: row.try_get("sku").map_err(EngineError::Database)?,
        display_name: row.try_get("display_name").map_err(EngineError::Database)?,
        unit_price,
        currency: row.try_get("currency").map_err(EngineError::Database)?,
        on_hand: row.try_get("on_hand").map_err(EngineError::Database)?,
        reserved: row.try_get("reserved").map_err(EngineError::Database)?,
        low_threshold: row.try_get("low_threshold").map_err(EngineError::Database)?,
        drop_starts_at: row.try_get("drop_starts_at").map_err(EngineError::Database)?,
        drop_ends_at: row.try_get("drop_ends_at").map_err(EngineError::Database)?,
        is_archived: row.try_get::<i64, _>("is_archived").map_err(EngineError::Database)? != 0,
    })
}
