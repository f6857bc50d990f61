//! Checkout: turns a cart or direct-buy intent into an order with an
//! atomic batch reservation.
//!
//! Everything up to and including the cart clear happens in one
//! transaction; a single short line rolls the whole thing back, so no
//! order row ever exists without its holds. The confirmation notification
//! runs after commit and is best-effort.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::inventory::{LineIntent, ResolvedLine, StockItem};
use crate::domain::money::round_half_up;
use crate::domain::order::{Order, OrderLine};
use crate::domain::ports::ConfirmationSink;
use crate::domain::reservation::Reservation;
use crate::infrastructure::persistence::carts::CartStore;
use crate::infrastructure::persistence::orders::{NewOrder, OrderStore};
use crate::infrastructure::persistence::reservations::ReservationStore;
use crate::infrastructure::persistence::shipping::ShippingStore;
use crate::infrastructure::persistence::stock_ledger::StockLedger;

/// Where the order's lines come from.
#[derive(Debug, Clone)]
pub enum CheckoutSource {
    /// A storefront cart; its rows are cleared when the checkout commits.
    Cart { cart_id: String },
    /// Inline line intents (buy-now, or a client-held cart).
    Lines { items: Vec<LineIntent> },
}

/// Shipping: a configured method by id, or an explicit override.
#[derive(Debug, Clone)]
pub enum ShippingChoice {
    Method { id: i64 },
    Override { name: String, cost: Decimal },
}

#[derive(Debug, Clone)]
pub struct CheckoutIntent {
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub source: CheckoutSource,
    pub shipping_address: serde_json::Value,
    /// Defaults to the shipping address.
    pub billing_address: Option<serde_json::Value>,
    pub shipping: ShippingChoice,
    pub customer_notes: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub reservations: Vec<Reservation>,
}

/// One row of a public stock-availability answer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AvailabilityReport {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub sku: Option<String>,
    pub requested: i64,
    pub available: i64,
    pub in_stock: bool,
}

pub struct CheckoutCoordinator {
    pool: SqlitePool,
    confirmation: Arc<dyn ConfirmationSink>,
    ttl_minutes: i64,
}

impl CheckoutCoordinator {
    pub fn new(pool: SqlitePool, confirmation: Arc<dyn ConfirmationSink>, config: &Config) -> Self {
        Self {
            pool,
            confirmation,
            ttl_minutes: config.reservation_ttl_minutes,
        }
    }

    pub async fn checkout(&self, intent: CheckoutIntent) -> EngineResult<CheckoutOutcome> {
        if intent.user_id.is_none()
            && intent
                .guest_email
                .as_deref()
                .is_none_or(|e| !e.contains('@'))
        {
            return Err(EngineError::validation(
                "guest checkout requires a valid email",
            ));
        }

        let mut tx = self.pool.begin().await?;

        let intents = match &intent.source {
            CheckoutSource::Cart { cart_id } => CartStore::line_intents(&mut tx, cart_id).await?,
            CheckoutSource::Lines { items } => items.clone(),
        };
        if intents.is_empty() {
            return Err(EngineError::validation("checkout has no lines"));
        }

        let resolved = resolve_lines(&mut tx, &intents).await?;

        let (shipping_name, shipping_cost) = match &intent.shipping {
            ShippingChoice::Method { id } => {
                let method = ShippingStore::get(&mut tx, *id).await?;
                if !method.is_active {
                    return Err(EngineError::validation(format!(
                        "shipping method {} is not available",
                        method.name
                    )));
                }
                (method.name, method.cost)
            }
            ShippingChoice::Override { name, cost } => (name.clone(), *cost),
        };

        let subtotal: Decimal = resolved.iter().map(|l| l.subtotal()).sum();
        let subtotal = round_half_up(subtotal);
        let total = round_half_up(subtotal + shipping_cost);

        let billing_address = intent
            .billing_address
            .clone()
            .unwrap_or_else(|| intent.shipping_address.clone());

        let order = OrderStore::insert(
            &mut tx,
            NewOrder {
                user_id: intent.user_id.clone(),
                guest_email: intent.guest_email.clone(),
                shipping_address: intent.shipping_address.clone(),
                billing_address,
                shipping_method_name: shipping_name,
                shipping_cost,
                subtotal,
                total,
                currency: intent.currency.clone(),
                customer_notes: intent.customer_notes.clone(),
            },
        )
        .await?;

        for line in &resolved {
            OrderStore::insert_line(&mut tx, &order.id, line).await?;
        }

        let reservations = ReservationStore::reserve_batch(
            &mut tx,
            &order.id,
            &resolved,
            chrono::Duration::minutes(self.ttl_minutes),
        )
        .await?;

        if let CheckoutSource::Cart { cart_id } = &intent.source {
            // Visible only at commit, so an aborted checkout keeps the cart.
            CartStore::clear(&mut tx, cart_id).await?;
        }

        tx.commit().await?;

        let mut conn = self.pool.acquire().await?;
        let lines = OrderStore::lines(&mut conn, &order.id).await?;
        drop(conn);

        info!(
            "Checkout committed: order {} with {} line(s), total {} {}",
            order.order_number,
            lines.len(),
            order.total,
            order.currency
        );

        if let Err(e) = self.confirmation.order_confirmed(&order, &lines).await {
            warn!(
                "Confirmation dispatch failed for order {} (order stands): {}",
                order.order_number, e
            );
        }

        Ok(CheckoutOutcome {
            order,
            lines,
            reservations,
        })
    }

    /// Public availability answer for a set of line intents; read-only.
    pub async fn check_stock(
        &self,
        intents: &[LineIntent],
    ) -> EngineResult<Vec<AvailabilityReport>> {
        let mut conn = self.pool.acquire().await?;
        let mut out = Vec::with_capacity(intents.len());
        for intent in intents {
            let item = lookup_item(&mut conn, intent).await?;
            out.push(match item {
                Some(item) => AvailabilityReport {
                    product_id: intent.product_id,
                    variant_id: intent.variant_id,
                    sku: Some(item.sku.clone()),
                    requested: intent.quantity,
                    available: item.available().max(0),
                    in_stock: item.available() >= intent.quantity,
                },
                None => AvailabilityReport {
                    product_id: intent.product_id,
                    variant_id: intent.variant_id,
                    sku: None,
                    requested: intent.quantity,
                    available: 0,
                    in_stock: false,
                },
            });
        }
        Ok(out)
    }
}

/// Resolution order: an open drop allocation for the product wins over the
/// variant's standing stock.
async fn lookup_item(
    conn: &mut SqliteConnection,
    intent: &LineIntent,
) -> EngineResult<Option<StockItem>> {
    if let Some(drop_item) = StockLedger::find_open_drop(conn, intent.product_id, Utc::now()).await?
    {
        return Ok(Some(drop_item));
    }
    match intent.variant_id {
        Some(variant_id) => StockLedger::find_variant(conn, variant_id).await,
        None => Ok(None),
    }
}

async fn resolve_lines(
    conn: &mut SqliteConnection,
    intents: &[LineIntent],
) -> EngineResult<Vec<ResolvedLine>> {
    let mut resolved = Vec::with_capacity(intents.len());
    for intent in intents {
        if intent.quantity <= 0 {
            return Err(EngineError::validation(format!(
                "quantity must be positive for product {}",
                intent.product_id
            )));
        }
        let item = lookup_item(conn, intent).await?.ok_or_else(|| {
            EngineError::validation(format!(
                "no sellable stock item for product {} (variant {:?})",
                intent.product_id, intent.variant_id
            ))
        })?;
        resolved.push(ResolvedLine {
            stock_item_id: item.id.clone(),
            name: item.display_name.clone(),
            sku: item.sku.clone(),
            unit_price: item.unit_price,
            quantity: intent.quantity,
        });
    }
    Ok(resolved)
}
