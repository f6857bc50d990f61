//! Inventory accounting types.
//!
//! A [`StockItem`] is the unit of inventory accounting for one sellable SKU:
//! either a product variant's standing stock or a time-limited drop
//! allocation for a product. The two are one table discriminated by
//! [`StockKind`] rather than parallel hierarchies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockKind {
    Variant,
    Drop,
}

impl fmt::Display for StockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockKind::Variant => write!(f, "variant"),
            StockKind::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for StockKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "variant" => Ok(StockKind::Variant),
            "drop" => Ok(StockKind::Drop),
            _ => anyhow::bail!("Invalid stock kind: {}", s),
        }
    }
}

/// Snapshot of one ledger row. Immutable between calls; every mutation goes
/// through the ledger and returns fresh values.
#[derive(Debug, Clone, Serialize)]
pub struct StockItem {
    pub id: String,
    pub kind: StockKind,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub sku: String,
    pub display_name: String,
    pub unit_price: Decimal,
    pub currency: String,
    pub on_hand: i64,
    pub reserved: i64,
    pub low_threshold: i64,
    pub drop_starts_at: Option<DateTime<Utc>>,
    pub drop_ends_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
}

impl StockItem {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.low_threshold
    }

    /// A drop allocation is sellable only inside its window; variant stock
    /// has no window.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_archived {
            return false;
        }
        match self.kind {
            StockKind::Variant => true,
            StockKind::Drop => {
                let started = self.drop_starts_at.is_none_or(|t| t <= now);
                let not_ended = self.drop_ends_at.is_none_or(|t| now < t);
                started && not_ended
            }
        }
    }
}

/// One requested line of a checkout before resolution against the ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct LineIntent {
    pub product_id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    pub quantity: i64,
}

/// A line intent bound to a concrete stock item, with the price/name/sku
/// snapshot taken at resolution time.
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub stock_item_id: String,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i64,
}

impl ResolvedLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}
