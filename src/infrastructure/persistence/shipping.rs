//! Shipping method lookup for checkout.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;

use crate::domain::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ShippingMethod {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cost: Decimal,
    pub estimated_delivery_min_days: Option<i64>,
    pub estimated_delivery_max_days: Option<i64>,
    pub is_active: bool,
}

pub struct ShippingStore;

impl ShippingStore {
    pub async fn insert(
        conn: &mut SqliteConnection,
        name: &str,
        description: Option<&str>,
        cost: Decimal,
        min_days: Option<i64>,
        max_days: Option<i64>,
    ) -> EngineResult<ShippingMethod> {
        let result = sqlx::query(
            r#"
            INSERT INTO shipping_method
                (name, description, cost, estimated_delivery_min_days,
                 estimated_delivery_max_days, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(cost.to_string())
        .bind(min_days)
        .bind(max_days)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Self::get(conn, result.last_insert_rowid()).await
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> EngineResult<ShippingMethod> {
        let row = sqlx::query("SELECT * FROM shipping_method WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| EngineError::not_found("shipping method", id.to_string()))?;
        map_method(&row)
    }

    pub async fn list_active(conn: &mut SqliteConnection) -> EngineResult<Vec<ShippingMethod>> {
        let rows = sqlx::query("SELECT * FROM shipping_method WHERE is_active = 1 ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(map_method).collect()
    }
}

fn map_method(row: &SqliteRow) -> EngineResult<ShippingMethod> {
    let cost_str: String = row.try_get("cost").map_err(EngineError::Database)?;
    Ok(ShippingMethod {
        id: row.try_get("id").map_err(EngineError::Database)?,
        name: row.try_get("name").map_err(EngineError::Database)?,
        description: row.try_get("description").map_err(EngineError::Database)?,
        cost: Decimal::from_str(&cost_str).map_err(|e| EngineError::Integrity {
            constraint: format!("unparseable shipping cost {:?}: {}", cost_str, e),
        })?,
        estimated_delivery_min_days: row
            .try_get("estimated_delivery_min_days")
            .map_err(EngineError::Database)?,
        estimated_delivery_max_days: row
            .try_get("estimated_delivery_max_days")
            .map_err(EngineError::Database)?,
        is_active: row.try_get::<i64, _>("is_active").map_err(EngineError::Database)? != 0,
    })
}
