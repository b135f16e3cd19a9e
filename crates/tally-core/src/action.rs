//! # Pending Actions
//!
//! Mutations recorded while the device is offline, replayed later in order.
//!
//! ## Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PendingAction (persisted as JSON, one array per identity)              │
//! │                                                                         │
//! │  {                                                                      │
//! │    "id":         "9f1c…",          ← idempotency key (UUID v4)          │
//! │    "type":       "SellProduct",    ← ActionKind                         │
//! │    "payload":    { ... },          ← type-specific data                 │
//! │    "enqueuedAt": "2024-03-09T10:30:00Z"                                 │
//! │  }                                                                      │
//! │                                                                         │
//! │  AddProduct    → full Product (overwrite stock/{barcode})               │
//! │  UpdateProduct → Product fields (merge into stock/{barcode})            │
//! │  SellProduct   → SaleDelta { day, sale, direction }                     │
//! │  UpdateStore   → StoreProfile (overwrite storeInfo)                     │
//! │  ResetSales    → SalesReset { day, restoreStock }                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The queue never reorders, coalesces or deduplicates actions. The `id`
//! lets the remote side recognise an action it has already applied.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{Product, SaleRecord, StoreProfile};

// =============================================================================
// Pending Action
// =============================================================================

/// A queued mutation waiting to be replayed against the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Idempotency key, also the key in the remote applied-actions ledger.
    pub id: Uuid,

    #[serde(flatten)]
    pub payload: ActionPayload,

    pub enqueued_at: DateTime<Utc>,
}

impl PendingAction {
    /// Wraps a payload with a fresh idempotency key.
    pub fn new(payload: ActionPayload, enqueued_at: DateTime<Utc>) -> Self {
        PendingAction {
            id: Uuid::new_v4(),
            payload,
            enqueued_at,
        }
    }

    #[inline]
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Type-specific data of a pending action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ActionPayload {
    AddProduct(Product),
    UpdateProduct(Product),
    SellProduct(SaleDelta),
    UpdateStore(StoreProfile),
    ResetSales(SalesReset),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::AddProduct(_) => ActionKind::AddProduct,
            ActionPayload::UpdateProduct(_) => ActionKind::UpdateProduct,
            ActionPayload::SellProduct(_) => ActionKind::SellProduct,
            ActionPayload::UpdateStore(_) => ActionKind::UpdateStore,
            ActionPayload::ResetSales(_) => ActionKind::ResetSales,
        }
    }

    /// Human-readable line for the activity log and notifications.
    pub fn describe(&self) -> String {
        match self {
            ActionPayload::AddProduct(p) => format!("Added {} to stock", p.name),
            ActionPayload::UpdateProduct(p) => format!("Updated {}", p.name),
            ActionPayload::SellProduct(delta) => match delta.direction {
                SaleDirection::Sell => {
                    format!("Sold {} x{}", delta.sale.name, delta.sale.sale_quantity)
                }
                SaleDirection::Reverse => format!("Removed {} from receipt", delta.sale.name),
            },
            ActionPayload::UpdateStore(_) => "Updated store information".to_string(),
            ActionPayload::ResetSales(reset) => {
                if reset.restore_stock {
                    "Reset sales and restored stock".to_string()
                } else {
                    "Reset sales".to_string()
                }
            }
        }
    }
}

/// Discriminant of an [`ActionPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    AddProduct,
    UpdateProduct,
    SellProduct,
    UpdateStore,
    ResetSales,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::AddProduct => "AddProduct",
            ActionKind::UpdateProduct => "UpdateProduct",
            ActionKind::SellProduct => "SellProduct",
            ActionKind::UpdateStore => "UpdateStore",
            ActionKind::ResetSales => "ResetSales",
        };
        f.write_str(s)
    }
}

/// Whether a sale delta records a sale or takes one back off the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleDirection {
    /// Decrement stock, write the sale record.
    Sell,
    /// Restore stock, delete the sale record.
    Reverse,
}

/// A sale applied to (or removed from) a day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleDelta {
    pub day: NaiveDate,
    pub sale: SaleRecord,
    pub direction: SaleDirection,
}

impl SaleDelta {
    /// Signed change to the product's stock quantity.
    pub fn stock_change(&self) -> i64 {
        match self.direction {
            SaleDirection::Sell => -self.sale.sale_quantity,
            SaleDirection::Reverse => self.sale.sale_quantity,
        }
    }
}

/// Clears one day bucket, optionally putting the sold units back on the shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReset {
    pub day: NaiveDate,
    pub restore_stock: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================
