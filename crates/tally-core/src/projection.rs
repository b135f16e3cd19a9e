//! # Local Projection
//!
//! What the remote store will look like once the offline queue has been
//! replayed, computed from the last snapshots plus the pending actions.
//!
//! ```text
//! cached snapshots ──┐
//!                    ├──► project() ──► catalog / today's receipt / profile
//! pending actions ───┘                  as the cashier expects to see them
//! ```
//!
//! Stock checks run against this view, so an offline cashier cannot sell
//! units that an earlier offline sale already took.
//!
//! An action can reach the remote store and still be queued (lost
//! acknowledgement, crash mid-replay). For today's sales the receipt shows
//! whether that happened: a sale already on it, or a reversal whose line
//! is already gone, leaves stock alone.

use chrono::NaiveDate;

use crate::action::{ActionPayload, PendingAction, SaleDirection};
use crate::types::{Product, SaleRecord, StoreProfile};

/// Snapshot data with pending actions applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    pub catalog: Vec<Product>,
    pub today_sales: Vec<SaleRecord>,
    pub store: StoreProfile,
}

impl Projection {
    pub fn product(&self, barcode: &str) -> Option<&Product> {
        self.catalog.iter().find(|p| p.barcode == barcode)
    }

    pub fn sale(&self, sale_id: &str) -> Option<&SaleRecord> {
        self.today_sales.iter().find(|s| s.sale_id == sale_id)
    }

    fn product_mut(&mut self, barcode: &str) -> Option<&mut Product> {
        self.catalog.iter_mut().find(|p| p.barcode == barcode)
    }

    fn upsert(&mut self, product: &Product) {
        match self.product_mut(&product.barcode) {
            Some(existing) => *existing = product.clone(),
            None => self.catalog.push(product.clone()),
        }
    }
}

/// Applies `pending` in order on top of the snapshots.
///
/// Sales and resets for days other than `today` only touch stock: the
/// projection holds no other day's receipt. Stock arithmetic saturates and
/// never goes below zero.
pub fn project(
    catalog: &[Product],
    today_sales: &[SaleRecord],
    store: &StoreProfile,
    today: NaiveDate,
    pending: &[PendingAction],
) -> Projection {
    let mut view = Projection {
        catalog: catalog.to_vec(),
        today_sales: today_sales.to_vec(),
        store: store.clone(),
    };

    for action in pending {
        match &action.payload {
            ActionPayload::AddProduct(product) | ActionPayload::UpdateProduct(product) => {
                view.upsert(product);
            }
            ActionPayload::SellProduct(delta) => {
                if delta.day == today {
                    let on_receipt = view.sale(&delta.sale.sale_id).is_some();
                    match delta.direction {
                        SaleDirection::Sell if on_receipt => continue,
                        SaleDirection::Sell => view.today_sales.push(delta.sale.clone()),
                        SaleDirection::Reverse if !on_receipt => continue,
                        SaleDirection::Reverse => {
                            view.today_sales.retain(|s| s.sale_id != delta.sale.sale_id);
                        }
                    }
                }
                if let Some(product) = view.product_mut(&delta.sale.barcode) {
                    product.quantity = product
                        .quantity
                        .saturating_add(delta.stock_change())
                        .max(0);
                }
            }
            ActionPayload::UpdateStore(profile) => view.store = profile.clone(),
            ActionPayload::ResetSales(reset) => {
                if reset.day != today {
                    continue;
                }
                let sold = std::mem::take(&mut view.today_sales);
                if reset.restore_stock {
                    for sale in &sold {
                        if let Some(product) = view.product_mut(&sale.barcode) {
                            product.quantity = product.quantity.saturating_add(sale.sale_quantity);
                        }
                    }
                }
            }
        }
    }

    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{SaleDelta, SalesReset};
    use crate::money::Money;
    use chrono::{TimeZone, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn action(payload: ActionPayload) -> PendingAction {
        PendingAction::new(payload, Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap())
    }

    fn sell(product: &Product, qty: i64) -> (SaleRecord, PendingAction) {
        let sale =
            SaleRecord::for_product(product, qty, Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap());
        let pending = action(ActionPayload::SellProduct(SaleDelta {
            day: today(),
            sale: sale.clone(),
            direction: SaleDirection::Sell,
        }));
        (sale, pending)
    }

    #[test]
    fn test_queued_sales_reduce_stock() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), 10);
        let (_, first) = sell(&cola, 3);
        let (_, second) = sell(&cola, 4);

        let view = project(&[cola], &[], &StoreProfile::default(), today(), &[first, second]);

        assert_eq!(view.product("111").unwrap().quantity, 3);
        assert_eq!(view.today_sales.len(), 2);
    }

    #[test]
    fn test_reverse_restores_and_removes_line() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), 10);
        let (sale, sold) = sell(&cola, 2);
        let reversed = action(ActionPayload::SellProduct(SaleDelta {
            day: today(),
            sale: sale.clone(),
            direction: SaleDirection::Reverse,
        }));

        let view = project(&[cola], &[], &StoreProfile::default(), today(), &[sold, reversed]);
        assert_eq!(view.product("111").unwrap().quantity, 10);
        assert!(view.today_sales.is_empty());
    }

    #[test]
    fn test_offline_added_product_is_visible() {
        let gum = Product::new("222", "Gum", Money::from_cents(50), 8);
        let view = project(
            &[],
            &[],
            &StoreProfile::default(),
            today(),
            &[action(ActionPayload::AddProduct(gum.clone()))],
        );
        assert_eq!(view.product("222"), Some(&gum));
    }

    #[test]
    fn test_reset_with_restore() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), 5);
        let earlier = SaleRecord::for_product(
            &cola,
            2,
            Utc.with_ymd_and_hms(2024, 3, 9, 9, 0, 0).unwrap(),
        );
        let reset = action(ActionPayload::ResetSales(SalesReset {
            day: today(),
            restore_stock: true,
        }));

        let view = project(&[cola], &[earlier], &StoreProfile::default(), today(), &[reset]);
        assert_eq!(view.product("111").unwrap().quantity, 7);
        assert!(view.today_sales.is_empty());
    }

    #[test]
    fn test_sale_already_in_snapshot_is_not_counted_twice() {
        // remote took the sale but the action is still queued
        let cola = Product::new("111", "Cola", Money::from_cents(150), 5);
        let (sale, queued) = sell(&cola, 3);
        let remote_cola = Product {
            quantity: 2,
            ..cola.clone()
        };

        let view = project(
            &[remote_cola],
            &[sale],
            &StoreProfile::default(),
            today(),
            &[queued],
        );
        assert_eq!(view.product("111").unwrap().quantity, 2);
        assert_eq!(view.today_sales.len(), 1);
    }

    #[test]
    fn test_reverse_already_in_snapshot_is_not_counted_twice() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), 10);
        let (sale, _) = sell(&cola, 2);
        let reversed = action(ActionPayload::SellProduct(SaleDelta {
            day: today(),
            sale,
            direction: SaleDirection::Reverse,
        }));

        // the line is already off the receipt and the units back on the shelf
        let view = project(&[cola], &[], &StoreProfile::default(), today(), &[reversed]);
        assert_eq!(view.product("111").unwrap().quantity, 10);
    }

    #[test]
    fn test_earlier_day_sale_only_touches_stock() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), 10);
        let yesterday = today().pred_opt().unwrap();
        let sale = SaleRecord::for_product(
            &cola,
            4,
            Utc.with_ymd_and_hms(2024, 3, 8, 18, 0, 0).unwrap(),
        );
        let queued = action(ActionPayload::SellProduct(SaleDelta {
            day: yesterday,
            sale,
            direction: SaleDirection::Sell,
        }));

        let view = project(&[cola], &[], &StoreProfile::default(), today(), &[queued]);
        assert_eq!(view.product("111").unwrap().quantity, 6);
        assert!(view.today_sales.is_empty());
    }

    #[test]
    fn test_stock_arithmetic_saturates() {
        let cola = Product::new("111", "Cola", Money::from_cents(150), i64::MAX);
        let mut sold = SaleRecord::for_product(
            &cola,
            5,
            Utc.with_ymd_and_hms(2024, 3, 9, 9, 0, 0).unwrap(),
        );
        sold.sale_quantity = i64::MAX;
        let reset = action(ActionPayload::ResetSales(SalesReset {
            day: today(),
            restore_stock: true,
        }));

        let view = project(&[cola], &[sold], &StoreProfile::default(), today(), &[reset]);
        assert_eq!(view.product("111").unwrap().quantity, i64::MAX);
    }

    #[test]
    fn test_store_update_wins() {
        let profile = StoreProfile {
            name: "Corner Shop".into(),
            ..StoreProfile::default()
        };
        let view = project(
            &[],
            &[],
            &StoreProfile::default(),
            today(),
            &[action(ActionPayload::UpdateStore(profile.clone()))],
        );
        assert_eq!(view.store, profile);
    }
}
