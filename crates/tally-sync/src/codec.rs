//! # Remote Record Codec
//!
//! Remote snapshots are untyped JSON written by any client version. They
//! are decoded into domain types here, once, and nowhere else.
//!
//! ## Quarantine
//! ```text
//! snapshot ──► per-record decode ──┬── ok ──────────► items
//!                                  └── malformed ───► warn! + count
//! ```
//! A malformed record is skipped so it can never reach aggregation; the
//! rest of the collection still loads.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use tally_core::{Product, SaleRecord, StoreProfile, MAX_PRICE_CENTS, MAX_STOCK_QUANTITY};

use crate::error::{SyncError, SyncResult};
use crate::remote::paths;

/// A decoded collection plus the number of records that were skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded<T> {
    pub items: T,
    pub quarantined: usize,
}

pub fn encode<T: Serialize>(value: &T) -> SyncResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Decodes one product. The map key wins over any stored barcode field.
pub fn decode_product(path: &str, barcode: &str, value: &Value) -> SyncResult<Product> {
    let mut record = value.clone();
    match &mut record {
        Value::Object(map) => {
            map.insert("barcode".into(), Value::String(barcode.to_string()));
        }
        _ => return Err(SyncError::malformed(path, "expected an object")),
    }

    let product: Product =
        serde_json::from_value(record).map_err(|e| SyncError::malformed(path, e.to_string()))?;

    if !(0..=MAX_STOCK_QUANTITY).contains(&product.quantity) {
        return Err(SyncError::malformed(path, "quantity out of range"));
    }
    if !(0..=MAX_PRICE_CENTS).contains(&product.price_cents) {
        return Err(SyncError::malformed(path, "price out of range"));
    }
    Ok(product)
}

/// Reads a single product snapshot (`users/{uid}/stock/{barcode}`).
pub fn decode_product_snapshot(
    uid: &str,
    barcode: &str,
    snapshot: Option<&Value>,
) -> SyncResult<Option<Product>> {
    snapshot
        .map(|value| decode_product(&paths::product(uid, barcode), barcode, value))
        .transpose()
}

pub fn decode_catalog(uid: &str, snapshot: Option<&Value>) -> Decoded<Vec<Product>> {
    let mut decoded = Decoded::default();
    let Some(value) = snapshot else {
        return decoded;
    };

    let Some(map) = value.as_object() else {
        warn!(uid = %uid, "Stock snapshot is not an object; quarantined");
        decoded.quarantined = 1;
        return decoded;
    };

    for (barcode, record) in map {
        let path = paths::product(uid, barcode);
        match decode_product(&path, barcode, record) {
            Ok(product) => decoded.items.push(product),
            Err(e) => {
                warn!(error = %e, "Quarantined product record");
                decoded.quarantined += 1;
            }
        }
    }
    decoded
}

/// Decodes a day bucket, ordered by sale time.
pub fn decode_sales_bucket(
    uid: &str,
    day: NaiveDate,
    snapshot: Option<&Value>,
) -> Decoded<Vec<SaleRecord>> {
    let mut decoded = Decoded::default();
    let Some(value) = snapshot else {
        return decoded;
    };

    let Some(map) = value.as_object() else {
        warn!(uid = %uid, day = %day, "Sales snapshot is not an object; quarantined");
        decoded.quarantined = 1;
        return decoded;
    };

    for (sale_id, record) in map {
        let path = paths::sale(uid, day, sale_id);
        match decode_sale(&path, sale_id, record) {
            Ok(sale) => decoded.items.push(sale),
            Err(e) => {
                warn!(error = %e, "Quarantined sale record");
                decoded.quarantined += 1;
            }
        }
    }

    decoded
        .items
        .sort_by(|a, b| (a.sale_time, &a.sale_id).cmp(&(b.sale_time, &b.sale_id)));
    decoded
}

fn decode_sale(path: &str, sale_id: &str, value: &Value) -> SyncResult<SaleRecord> {
    let mut sale: SaleRecord = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::malformed(path, e.to_string()))?;
    sale.sale_id = sale_id.to_string();

    if !(1..=MAX_STOCK_QUANTITY).contains(&sale.sale_quantity) {
        return Err(SyncError::malformed(path, "sale quantity out of range"));
    }
    if !(0..=MAX_PRICE_CENTS).contains(&sale.price_cents) {
        return Err(SyncError::malformed(path, "price out of range"));
    }
    Ok(sale)
}

/// Missing profile means defaults; a malformed one is quarantined.
pub fn decode_store_profile(uid: &str, snapshot: Option<&Value>) -> Decoded<StoreProfile> {
    match snapshot {
        None => Decoded::default(),
        Some(value) => match serde_json::from_value::<StoreProfile>(value.clone()) {
            Ok(profile) => Decoded {
                items: profile,
                quarantined: 0,
            },
            Err(e) => {
                warn!(path = %paths::store_info(uid), error = %e, "Quarantined store profile");
                Decoded {
                    items: StoreProfile::default(),
                    quarantined: 1,
                }
            }
        },
    }
}
