use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Shared connection pool plus schema bootstrap.
///
/// The database is the coordination primitive for the whole engine: every
/// numeric invariant the application upholds is also expressed here as a
/// CHECK constraint, so a bug elsewhere surfaces as a constraint error
/// instead of silent overselling.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, busy_timeout: Duration) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .busy_timeout(busy_timeout)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Stock ledger. The CHECKs keep both counters non-negative and
        // reserved within on_hand in every committed state.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_item (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK (kind IN ('variant', 'drop')),
                product_id INTEGER NOT NULL,
                variant_id INTEGER,
                sku TEXT NOT NULL,
                display_name TEXT NOT NULL,
                unit_price TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'EUR',
                on_hand INTEGER NOT NULL DEFAULT 0 CHECK (on_hand >= 0),
                reserved INTEGER NOT NULL DEFAULT 0 CHECK (reserved >= 0),
                low_threshold INTEGER NOT NULL DEFAULT 5 CHECK (low_threshold >= 0),
                drop_starts_at TEXT,
                drop_ends_at TEXT,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (reserved <= on_hand)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create stock_item table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_stock_item_product
            ON stock_item (product_id, kind);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create stock_item index")?;

        // 2. Orders
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                order_number TEXT NOT NULL UNIQUE,
                user_id TEXT,
                guest_email TEXT,
                shipping_address TEXT NOT NULL,
                billing_address TEXT NOT NULL,
                shipping_method_name TEXT NOT NULL,
                shipping_cost TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                total TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'EUR',
                order_status TEXT NOT NULL DEFAULT 'pending_payment',
                payment_status TEXT NOT NULL DEFAULT 'pending',
                customer_notes TEXT,
                tracking_number TEXT,
                shipped_at TEXT,
                delivered_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_payment_created
            ON orders (payment_status, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders payment index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_user
            ON orders (user_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders user index")?;

        // 3. Order lines (immutable snapshots)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_line (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL REFERENCES orders(id),
                stock_item_id TEXT NOT NULL REFERENCES stock_item(id),
                name TEXT NOT NULL,
                sku TEXT NOT NULL,
                unit_price TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                subtotal TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_order_line_order ON order_line (order_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order_line table")?;

        // 4. Reservations. The state/terminal_at CHECK pins the rule that
        // a row is active iff it has no terminal timestamp.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reservation (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id),
                stock_item_id TEXT NOT NULL REFERENCES stock_item(id),
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                state TEXT NOT NULL DEFAULT 'active'
                    CHECK (state IN ('active', 'fulfilled', 'released')),
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                terminal_at TEXT,
                CHECK ((state = 'active' AND terminal_at IS NULL)
                    OR (state <> 'active' AND terminal_at IS NOT NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_reservation_expiry ON reservation (expires_at, state);
            CREATE INDEX IF NOT EXISTS idx_reservation_order ON reservation (order_id, state);
            CREATE INDEX IF NOT EXISTS idx_reservation_item ON reservation (stock_item_id, state);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create reservation table")?;

        // 5. Payment attempts; gateway_token is the idempotency key.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payment_attempt (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL REFERENCES orders(id),
                gateway_token TEXT NOT NULL UNIQUE,
                method_type TEXT NOT NULL DEFAULT 'credit_card',
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'succeeded', 'failed', 'cancelled')),
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_payment_attempt_order ON payment_attempt (order_id, id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create payment_attempt table")?;

        // 6. Shipping methods
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shipping_method (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                cost TEXT NOT NULL,
                estimated_delivery_min_days INTEGER,
                estimated_delivery_max_days INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create shipping_method table")?;

        // 7. Carts (filled by the storefront; cleared after checkout commits)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cart (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cart_item (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cart_id TEXT NOT NULL REFERENCES cart(id),
                product_id INTEGER NOT NULL,
                variant_id INTEGER,
                quantity INTEGER NOT NULL CHECK (quantity > 0)
            );
            CREATE INDEX IF NOT EXISTS idx_cart_item_cart ON cart_item (cart_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create cart tables")?;

        // 8. Scheduler sweep log (rolling)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sweep_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                expired_released INTEGER NOT NULL,
                orphans_released INTEGER NOT NULL,
                orders_cancelled INTEGER NOT NULL,
                payments_reconciled INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create sweep_run table")?;

        Ok(())
    }
}
