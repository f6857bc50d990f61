//! Shared harness: a throwaway on-disk SQLite database, seeded stock, a
//! scriptable mock gateway, and the engine services wired the way the
//! binaries wire them.
#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

use atelier::application::admin::AdminService;
use atelier::application::checkout::{
    CheckoutCoordinator, CheckoutIntent, CheckoutSource, ShippingChoice,
};
use atelier::application::lifecycle::OrderLifecycle;
use atelier::application::reconciler::PaymentReconciler;
use atelier::application::sweeper::ExpirySweeper;
use atelier::config::Config;
use atelier::domain::inventory::{LineIntent, StockItem, StockKind};
use atelier::domain::ports::{WebhookVerifier, CurrencyService};
use atelier::infrastructure::currency::FixedRateConverter;
use atelier::infrastructure::gateway::mock::MockGateway;
use atelier::infrastructure::gateway::verifier::InsecureVerifier;
use atelier::infrastructure::notifications::LoggingConfirmationSink;
use atelier::infrastructure::persistence::Database;
use atelier::infrastructure::persistence::stock_ledger::{NewStockItem, StockLedger};

pub fn test_config(tmp: &tempfile::TempDir) -> Config {
    Config {
        database_url: format!(
            "sqlite://{}",
            tmp.path().join("atelier-test.db").to_string_lossy()
        ),
        bind_address: "127.0.0.1".into(),
        port: 0,
        admin_api_token: "test-admin".into(),
        reservation_ttl_minutes: 15,
        scheduler_interval_minutes: 5,
        hard_timeout_minutes: 15,
        batch_size: 100,
        sweep_log_retention: 50,
        pull_window_hours: 24,
        lock_timeout_seconds: 10,
        scheduler_lock_file: tmp
            .path()
            .join("scheduler.lock")
            .to_string_lossy()
            .into_owned(),
        gateway_shop_id: "shop".into(),
        gateway_secret: "secret".into(),
        gateway_base_url: "https://checkout.example".into(),
        gateway_sandbox: true,
        payment_currency: "EUR".into(),
        frontend_url: "http://localhost:3000".into(),
        backend_url: "http://localhost:8000".into(),
        rate_fallback: dec!(3.2),
        exchange_rate_url: "https://api.exchangerate.host/latest".into(),
    }
}

pub struct TestEnv {
    pub db: Database,
    pub config: Config,
    pub gateway: Arc<MockGateway>,
    pub checkout: CheckoutCoordinator,
    pub reconciler: PaymentReconciler,
    pub lifecycle: OrderLifecycle,
    pub admin: AdminService,
    _tmp: tempfile::TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(&tmp);
        tweak(&mut config);

        let db = Database::new(
            &config.database_url,
            Duration::from_secs(config.lock_timeout_seconds),
        )
        .await
        .expect("database");

        let gateway = Arc::new(MockGateway::new());
        let env = Self {
            checkout: CheckoutCoordinator::new(
                db.pool.clone(),
                Arc::new(LoggingConfirmationSink),
                &config,
            ),
            reconciler: make_reconciler(&db, &config, gateway.clone(), Arc::new(InsecureVerifier)),
            lifecycle: OrderLifecycle::new(db.pool.clone()),
            admin: AdminService::new(db.pool.clone()),
            gateway,
            db,
            config,
            _tmp: tmp,
        };
        env
    }

    /// A sweeper with a fresh reconciler over the same mock gateway.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.db.pool.clone(),
            make_reconciler(
                &self.db,
                &self.config,
                self.gateway.clone(),
                Arc::new(InsecureVerifier),
            ),
            &self.config,
        )
    }

    /// A reconciler using a specific webhook verifier.
    pub fn reconciler_with_verifier(&self, verifier: Arc<dyn WebhookVerifier>) -> PaymentReconciler {
        make_reconciler(&self.db, &self.config, self.gateway.clone(), verifier)
    }

    pub async fn seed_variant(
        &self,
        product_id: i64,
        variant_id: i64,
        sku: &str,
        unit_price: Decimal,
        on_hand: i64,
    ) -> StockItem {
        let mut conn = self.db.pool.acquire().await.unwrap();
        StockLedger::insert(
            &mut conn,
            NewStockItem {
                kind: StockKind::Variant,
                product_id,
                variant_id: Some(variant_id),
                sku: sku.into(),
                display_name: format!("Item {}", sku),
                unit_price,
                currency: "EUR".into(),
                on_hand,
                low_threshold: 5,
                drop_starts_at: None,
                drop_ends_at: None,
            },
        )
        .await
        .expect("seed variant")
    }

    pub async fn seed_drop(
        &self,
        product_id: i64,
        sku: &str,
        unit_price: Decimal,
        on_hand: i64,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> StockItem {
        let mut conn = self.db.pool.acquire().await.unwrap();
        StockLedger::insert(
            &mut conn,
            NewStockItem {
                kind: StockKind::Drop,
                product_id,
                variant_id: None,
                sku: sku.into(),
                display_name: format!("Drop {}", sku),
                unit_price,
                currency: "EUR".into(),
                on_hand,
                low_threshold: 5,
                drop_starts_at: window.map(|(start, _)| start),
                drop_ends_at: window.map(|(_, end)| end),
            },
        )
        .await
        .expect("seed drop")
    }

    pub async fn stock_id_for_sku(&self, sku: &str) -> String {
        sqlx::query_scalar("SELECT id FROM stock_item WHERE sku = ?")
            .bind(sku)
            .fetch_one(&self.db.pool)
            .await
            .expect("stock item by sku")
    }

    pub async fn stock(&self, item_id: &str) -> StockItem {
        let mut conn = self.db.pool.acquire().await.unwrap();
        StockLedger::get(&mut conn, item_id).await.expect("stock item")
    }

    /// Move a reservation's expiry into the past.
    pub async fn expire_reservation(&self, reservation_id: &str) {
        sqlx::query("UPDATE reservation SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::minutes(1))
            .bind(reservation_id)
            .execute(&self.db.pool)
            .await
            .expect("expire reservation");
    }

    /// Backdate an order's creation (hard-timeout and pull-window tests).
    pub async fn age_order(&self, order_id: &str, minutes: i64) {
        sqlx::query("UPDATE orders SET created_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::minutes(minutes))
            .bind(order_id)
            .execute(&self.db.pool)
            .await
            .expect("age order");
    }

    /// Counters in range and reserved equal to the ACTIVE reservation sum,
    /// for every stock item.
    pub async fn assert_ledger_invariants(&self) {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.sku, s.on_hand, s.reserved,
                   (SELECT COALESCE(SUM(quantity), 0) FROM reservation
                    WHERE stock_item_id = s.id AND state = 'active') AS active_sum
            FROM stock_item s
            "#,
        )
        .fetch_all(&self.db.pool)
        .await
        .expect("invariant query");

        for row in rows {
            let sku: String = row.try_get("sku").unwrap();
            let on_hand: i64 = row.try_get("on_hand").unwrap();
            let reserved: i64 = row.try_get("reserved").unwrap();
            let active_sum: i64 = row.try_get("active_sum").unwrap();
            assert!(on_hand >= 0, "{}: on_hand {} < 0", sku, on_hand);
            assert!(reserved >= 0, "{}: reserved {} < 0", sku, reserved);
            assert!(
                reserved <= on_hand,
                "{}: reserved {} > on_hand {}",
                sku,
                reserved,
                on_hand
            );
            assert_eq!(
                reserved, active_sum,
                "{}: reserved {} != active reservation sum {}",
                sku, reserved, active_sum
            );
        }
    }
}

pub fn make_reconciler(
    db: &Database,
    config: &Config,
    gateway: Arc<MockGateway>,
    verifier: Arc<dyn WebhookVerifier>,
) -> PaymentReconciler {
    let currency: Arc<dyn CurrencyService> = Arc::new(FixedRateConverter::new(dec!(3.2)));
    PaymentReconciler::new(db.pool.clone(), gateway, currency, verifier, config)
}

/// A guest checkout intent over inline line items.
pub fn guest_intent(items: Vec<LineIntent>) -> CheckoutIntent {
    CheckoutIntent {
        user_id: None,
        guest_email: Some("guest@example.com".into()),
        source: CheckoutSource::Lines { items },
        shipping_address: serde_json::json!({"city": "Minsk", "line1": "Praspiekt 1"}),
        billing_address: None,
        shipping: ShippingChoice::Override {
            name: "Standard".into(),
            cost: dec!(0.00),
        },
        customer_notes: None,
        currency: "EUR".into(),
    }
}

pub fn line(product_id: i64, variant_id: Option<i64>, quantity: i64) -> LineIntent {
    LineIntent {
        product_id,
        variant_id,
        quantity,
    }
}

/// The webhook body shape the gateway posts.
pub fn webhook_body(token: &str, tracking_id: &str, status: &str) -> Vec<u8> {
    serde_json::json!({
        "checkout": {
            "token": token,
            "status": status,
            "order": { "tracking_id": tracking_id },
        }
    })
    .to_string()
    .into_bytes()
}
