//! # Domain Types
//!
//! Core domain types used throughout Tally POS.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │   SaleRecord    │   │  StoreProfile   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  barcode (key)  │   │  sale_id (key)  │   │  name           │       │
//! │  │  name           │   │  barcode        │   │  address        │       │
//! │  │  price_cents    │   │  price_cents    │   │  phone          │       │
//! │  │  quantity       │   │  sale_quantity  │   └─────────────────┘       │
//! │  │  updated_at     │   │  sale_time      │                              │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  Remote layout (per account, `users/{uid}/...`):                        │
//! │    stock/{barcode}            → Product                                 │
//! │    sales/{YYYY-MM-DD}/{id}    → SaleRecord (day bucket)                 │
//! │    storeInfo                  → StoreProfile                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Fields
//! The barcode and sale id are the keys the records live under in the remote
//! store. When a record is decoded from a snapshot the key wins over any
//! value embedded in the body.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;
use crate::{DEFAULT_STORE_NAME, LOW_STOCK_THRESHOLD};

// =============================================================================
// Product
// =============================================================================

/// A product in the store's catalog.
///
/// Products are never removed: "deleting" one forces its quantity to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Product {
    /// Barcode (EAN-13, UPC-A, ...). Unique key within the catalog.
    pub barcode: String,

    /// Display name shown in the catalog and on receipts.
    pub name: String,

    /// Price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Units on hand. Never negative.
    pub quantity: i64,

    /// When the product was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Creates a product that has not been written yet.
    pub fn new(
        barcode: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        quantity: i64,
    ) -> Self {
        Product {
            barcode: barcode.into(),
            name: name.into(),
            price_cents: price.cents(),
            quantity,
            updated_at: None,
        }
    }

    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// True when the product is at or below the replenishment threshold.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= LOW_STOCK_THRESHOLD
    }

    /// Checks if `quantity` units can be sold without going negative.
    #[inline]
    pub fn can_sell(&self, quantity: i64) -> bool {
        self.quantity >= quantity
    }
}

// =============================================================================
// Sale Record
// =============================================================================

/// A single sale line recorded in a day bucket.
///
/// Uses the snapshot pattern: name and price are frozen at the time of sale,
/// so later catalog edits don't rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaleRecord {
    /// Opaque generated id. Key within the day bucket.
    #[serde(default)]
    pub sale_id: String,

    /// Barcode of the product sold.
    pub barcode: String,

    /// Product name at time of sale (frozen).
    pub name: String,

    /// Unit price in cents at time of sale (frozen).
    pub price_cents: i64,

    /// Units sold. Always > 0.
    pub sale_quantity: i64,

    /// When the sale happened.
    #[ts(as = "String")]
    pub sale_time: DateTime<Utc>,
}

impl SaleRecord {
    /// Records a sale of `quantity` units of `product` at `at`.
    pub fn for_product(product: &Product, quantity: i64, at: DateTime<Utc>) -> Self {
        SaleRecord {
            sale_id: Uuid::new_v4().to_string(),
            barcode: product.barcode.clone(),
            name: product.name.clone(),
            price_cents: product.price_cents,
            sale_quantity: quantity,
            sale_time: at,
        }
    }

    /// Returns the unit price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Line total (unit price × quantity).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.price().multiply_quantity(self.sale_quantity)
    }

    /// Day bucket this sale belongs to.
    #[inline]
    pub fn day(&self) -> NaiveDate {
        self.sale_time.date_naive()
    }
}

// =============================================================================
// Store Profile
// =============================================================================

/// Store details printed on receipts and shown on the account page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StoreProfile {
    /// Store name. Required.
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub phone: String,
}

impl Default for StoreProfile {
    fn default() -> Self {
        StoreProfile {
            name: DEFAULT_STORE_NAME.to_string(),
            address: String::new(),
            phone: String::new(),
        }
    }
}

// =============================================================================
// Activity Log
// =============================================================================

/// One entry of the per-account audit trail ("Sold Cola x2", "PIN created").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActivityEntry {
    pub action: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(action: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        ActivityEntry {
            action: action.into(),
            timestamp,
        }
    }
}

// =============================================================================
// Day Buckets
// =============================================================================

/// Formats a date as a day-bucket key (`YYYY-MM-DD`).
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use tally_core::types::day_key;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(day_key(date), "2024-03-09");
/// ```
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses a day-bucket key back into a date.
pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

// =============================================================================
// Unit Tests
// =============================================================================
