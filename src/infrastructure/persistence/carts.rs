//! Minimal cart storage. The storefront fills carts; checkout reads the
//! line intents and clears the rows only after its transaction commits.

use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::inventory::LineIntent;

pub struct CartStore;

impl CartStore {
    pub async fn create(
        conn: &mut SqliteConnection,
        user_id: Option<&str>,
    ) -> EngineResult<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO cart (id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
        Ok(id)
    }

    pub async fn add_item(
        conn: &mut SqliteConnection,
        cart_id: &str,
        intent: &LineIntent,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO cart_item (cart_id, product_id, variant_id, quantity) VALUES (?, ?, ?, ?)",
        )
        .bind(cart_id)
        .bind(intent.product_id)
        .bind(intent.variant_id)
        .bind(intent.quantity)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn line_intents(
        conn: &mut SqliteConnection,
        cart_id: &str,
    ) -> EngineResult<Vec<LineIntent>> {
        let exists = sqlx::query("SELECT 1 FROM cart WHERE id = ?")
            .bind(cart_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(EngineError::not_found("cart", cart_id));
        }

        let rows = sqlx::query(
            "SELECT product_id, variant_id, quantity FROM cart_item WHERE cart_id = ? ORDER BY id",
        )
        .bind(cart_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LineIntent {
                    product_id: row.try_get("product_id").map_err(EngineError::Database)?,
                    variant_id: row.try_get("variant_id").map_err(EngineError::Database)?,
                    quantity: row.try_get("quantity").map_err(EngineError::Database)?,
                })
            })
            .collect()
    }

    pub async fn clear(conn: &mut SqliteConnection, cart_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM cart_item WHERE cart_id = ?")
            .bind(cart_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
