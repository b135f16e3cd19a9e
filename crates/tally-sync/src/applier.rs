//! # Mutation Applier
//!
//! Translates a [`PendingAction`] into remote writes. The store service
//! uses it for live mutations and the reconciler for replay, so an action
//! means the same thing whether it ran online or was queued.
//!
//! ## Apply Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         apply(uid, action)                              │
//! │                                                                         │
//! │  1. GET appliedActions/{id} ──── present ──► AlreadyApplied (no write)  │
//! │                │ absent                                                 │
//! │                ▼                                                        │
//! │  2. Read what the action depends on (product, sales bucket)             │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  3. Build one multi-path update:                                        │
//! │       effects of the action  +  appliedActions/{id}                     │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  4. update_many ──── all paths or none                                  │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  5. Activity log entry (best-effort)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the ledger entry lands in the same atomic write as the effects,
//! an action whose acknowledgement was lost is skipped on the next replay
//! instead of being applied twice.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::validation::stock_after_restock;
use tally_core::{
    ActionPayload, CoreError, PendingAction, Product, SaleDelta, SaleDirection, SalesReset,
};

use crate::activity::ActivityLog;
use crate::codec::{decode_product_snapshot, decode_sales_bucket, encode};
use crate::error::SyncResult;
use crate::remote::{paths, RemoteStore};

/// Whether `apply` wrote anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The ledger shows this action was applied before.
    AlreadyApplied,
}

pub struct MutationApplier {
    remote: Arc<dyn RemoteStore>,
    activity: ActivityLog,
}

impl MutationApplier {
    pub fn new(remote: Arc<dyn RemoteStore>, activity: ActivityLog) -> Self {
        MutationApplier { remote, activity }
    }

    /// True when the ledger holds `action_id`.
    pub async fn is_applied(&self, uid: &str, action_id: &Uuid) -> SyncResult<bool> {
        Ok(self
            .remote
            .get(&paths::applied_action(uid, action_id))
            .await?
            .is_some())
    }

    /// Applies `action` for account `uid` at most once.
    pub async fn apply(&self, uid: &str, action: &PendingAction) -> SyncResult<ApplyOutcome> {
        let ledger_path = paths::applied_action(uid, &action.id);
        if self.is_applied(uid, &action.id).await? {
            debug!(uid = %uid, action_id = %action.id, "Action already in ledger, skipping");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let mut updates = self.effects(uid, action).await?;
        updates.insert(
            ledger_path,
            json!({
                "kind": action.kind().to_string(),
                "appliedAt": Utc::now().to_rfc3339(),
            }),
        );

        let paths_written = updates.len();
        self.remote.update_many(updates).await?;

        info!(
            uid = %uid,
            action_id = %action.id,
            kind = %action.kind(),
            paths = paths_written,
            "Action applied"
        );

        self.activity.record(uid, &action.payload.describe()).await;
        Ok(ApplyOutcome::Applied)
    }

    async fn effects(&self, uid: &str, action: &PendingAction) -> SyncResult<BTreeMap<String, Value>> {
        let at = action.enqueued_at;
        let mut updates = BTreeMap::new();

        match &action.payload {
            ActionPayload::AddProduct(product) => {
                let mut product = product.clone();
                product.updated_at = Some(at);
                updates.insert(paths::product(uid, &product.barcode), encode(&product)?);
            }

            ActionPayload::UpdateProduct(product) => {
                let base = paths::product(uid, &product.barcode);
                updates.insert(format!("{}/barcode", base), json!(product.barcode));
                updates.insert(format!("{}/name", base), json!(product.name));
                updates.insert(format!("{}/priceCents", base), json!(product.price_cents));
                updates.insert(format!("{}/quantity", base), json!(product.quantity));
                updates.insert(format!("{}/updatedAt", base), encode(&at)?);
            }

            ActionPayload::SellProduct(delta) => {
                self.sale_effects(uid, delta, &mut updates).await?;
            }

            ActionPayload::UpdateStore(profile) => {
                updates.insert(paths::store_info(uid), encode(profile)?);
            }

            ActionPayload::ResetSales(reset) => {
                self.reset_effects(uid, reset, &mut updates).await?;
            }
        }

        // every stock write carries the action time
        let stamp = encode(&at)?;
        let touched: Vec<String> = updates
            .keys()
            .filter_map(|path| path.strip_suffix("/quantity").map(str::to_string))
            .filter(|base| base.contains("/stock/"))
            .collect();
        for base in touched {
            updates.entry(format!("{}/updatedAt", base)).or_insert(stamp.clone());
        }

        Ok(updates)
    }

    async fn current_product(&self, uid: &str, barcode: &str) -> SyncResult<Option<Product>> {
        let snapshot = self.remote.get(&paths::product(uid, barcode)).await?;
        decode_product_snapshot(uid, barcode, snapshot.as_ref())
    }

    async fn sale_effects(
        &self,
        uid: &str,
        delta: &SaleDelta,
        updates: &mut BTreeMap<String, Value>,
    ) -> SyncResult<()> {
        let sale = &delta.sale;
        let product = self.current_product(uid, &sale.barcode).await?;
        let sale_path = paths::sale(uid, delta.day, &sale.sale_id);

        match delta.direction {
            SaleDirection::Sell => {
                let product =
                    product.ok_or_else(|| CoreError::ProductNotFound(sale.barcode.clone()))?;
                if !product.can_sell(sale.sale_quantity) {
                    return Err(CoreError::InsufficientStock {
                        barcode: sale.barcode.clone(),
                        available: product.quantity,
                        requested: sale.sale_quantity,
                    }
                    .into());
                }

                updates.insert(
                    format!("{}/quantity", paths::product(uid, &sale.barcode)),
                    json!(product.quantity - sale.sale_quantity),
                );
                updates.insert(sale_path, encode(sale)?);
            }

            SaleDirection::Reverse => {
                match product {
                    Some(product) => {
                        updates.insert(
                            format!("{}/quantity", paths::product(uid, &sale.barcode)),
                            json!(stock_after_restock(product.quantity, sale.sale_quantity)?),
                        );
                    }
                    None => warn!(
                        uid = %uid,
                        barcode = %sale.barcode,
                        "Reversed sale for a product that no longer exists; stock not restored"
                    ),
                }
                updates.insert(sale_path, Value::Null);
            }
        }
        Ok(())
    }

    async fn reset_effects(
        &self,
        uid: &str,
        reset: &SalesReset,
        updates: &mut BTreeMap<String, Value>,
    ) -> SyncResult<()> {
        if reset.restore_stock {
            let snapshot = self.remote.get(&paths::sales_day(uid, reset.day)).await?;
            let sales = decode_sales_bucket(uid, reset.day, snapshot.as_ref()).items;

            let mut sold: Vec<(String, i64)> = Vec::new();
            let mut index: HashMap<String, usize> = HashMap::new();
            for sale in &sales {
                match index.get(&sale.barcode) {
                    Some(&i) => sold[i].1 = sold[i].1.saturating_add(sale.sale_quantity),
                    None => {
                        index.insert(sale.barcode.clone(), sold.len());
                        sold.push((sale.barcode.clone(), sale.sale_quantity));
                    }
                }
            }

            for (barcode, quantity) in sold {
                match self.current_product(uid, &barcode).await? {
                    Some(product) => {
                        updates.insert(
                            format!("{}/quantity", paths::product(uid, &barcode)),
                            json!(stock_after_restock(product.quantity, quantity)?),
                        );
                    }
                    None => debug!(barcode = %barcode, "Skipping restore for missing product"),
                }
            }
        }

        updates.insert(paths::sales_day(uid, reset.day), Value::Null);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
