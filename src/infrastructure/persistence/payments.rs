//! Payment attempt rows. `gateway_token` is unique; inserting a duplicate
//! surfaces as an integrity error, which is the intended behaviour for a
//! replayed token-create response.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::payment::{AttemptStatus, PaymentAttempt};

pub struct PaymentStore;

impl PaymentStore {
    pub async fn insert_pending(
        conn: &mut SqliteConnection,
        order_id: &str,
        gateway_token: &str,
        method_type: &str,
        amount: Decimal,
        currency: &str,
        details: serde_json::Value,
    ) -> EngineResult<PaymentAttempt> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO payment_attempt
                (order_id, gateway_token, method_type, amount, currency, status, details,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(gateway_token)
        .bind(method_type)
        .bind(amount.to_string())
        .bind(currency)
        .bind(details.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Self::find_by_token(conn, gateway_token)
            .await?
            .ok_or_else(|| EngineError::not_found("payment attempt", gateway_token))
    }

    pub async fn find_by_token(
        conn: &mut SqliteConnection,
        token: &str,
    ) -> EngineResult<Option<PaymentAttempt>> {
        let row = sqlx::query("SELECT * FROM payment_attempt WHERE gateway_token = ?")
            .bind(token)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(map_attempt).transpose()
    }

    pub async fn latest_for_order(
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> EngineResult<Option<PaymentAttempt>> {
        let row = sqlx::query(
            "SELECT * FROM payment_attempt WHERE order_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(map_attempt).transpose()
    }

    pub async fn for_order(
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> EngineResult<Vec<PaymentAttempt>> {
        let rows = sqlx::query("SELECT * FROM payment_attempt WHERE order_id = ? ORDER BY id")
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(map_attempt).collect()
    }

    /// Record a status reading. Each delivery appends to the per-source
    /// list in `details`, so a replayed webhook is visible in the log even
    /// though the status itself no longer changes. A terminal attempt
    /// status is never overwritten by a later conflicting reading.
    pub async fn record_status(
        conn: &mut SqliteConnection,
        token: &str,
        status: AttemptStatus,
        log_key: &str,
        log_entry: serde_json::Value,
    ) -> EngineResult<()> {
        let attempt = Self::find_by_token(conn, token)
            .await?
            .ok_or_else(|| EngineError::not_found("payment attempt", token))?;

        let mut details = attempt.details.clone();
        if !details.is_object() {
            details = serde_json::json!({});
        }
        let map = details.as_object_mut().expect("details is an object");
        match map.get_mut(log_key) {
            Some(serde_json::Value::Array(list)) => list.push(log_entry),
            _ => {
                map.insert(log_key.to_string(), serde_json::json!([log_entry]));
            }
        }

        let next_status = if attempt.status == AttemptStatus::Pending {
            status
        } else {
            attempt.status
        };

        sqlx::query(
            r#"
            UPDATE payment_attempt
            SET status = ?, details = ?, updated_at = ?
            WHERE gateway_token = ?
            "#,
        )
        .bind(next_status.to_string())
        .bind(details.to_string())
        .bind(Utc::now())
        .bind(token)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

fn map_attempt(row: &SqliteRow) -> EngineResult<PaymentAttempt> {
    let status_str: String = row.try_get("status").map_err(EngineError::Database)?;
    let amount_str: String = row.try_get("amount").map_err(EngineError::Database)?;
    let details_str: String = row.try_get("details").map_err(EngineError::Database)?;

    Ok(PaymentAttempt {
        id: row.try_get("id").map_err(EngineError::Database)?,
        order_id: row.try_get("order_id").map_err(EngineError::Database)?,
        gateway_token: row.try_get("gateway_token").map_err(EngineError::Database)?,
        method_type: row.try_get("method_type").map_err(EngineError::Database)?,
        amount: Decimal::from_str(&amount_str).map_err(|e| EngineError::Integrity {
            constraint: format!("unparseable amount {:?}: {}", amount_str, e),
        })?,
        currency: row.try_get("currency").map_err(EngineError::Database)?,
        status: AttemptStatus::from_str(&status_str).map_err(|e| EngineError::Integrity {
            constraint: e.to_string(),
        })?,
        details: serde_json::from_str(&details_str).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.try_get("created_at").map_err(EngineError::Database)?,
        updated_at: row.try_get("updated_at").map_err(EngineError::Database)?,
    })
}
