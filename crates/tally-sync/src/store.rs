//! # Store Service
//!
//! Catalog, sales and store-profile operations behind the Stock, Sell,
//! Analytics and Account views.
//!
//! ## Mutation Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        submit(action)                                   │
//! │                                                                         │
//! │  validate input ──► check against projection (stock, existence)         │
//! │                          │                                              │
//! │            online and queue empty?                                      │
//! │              │ yes                          │ no                        │
//! │              ▼                              ▼                           │
//! │      applier.apply(action)            queue.enqueue(action)             │
//! │        │ ok      │ retryable              "You're offline..."           │
//! │        ▼         └──────────► enqueue + ask reconciler to retry         │
//! │     Applied                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! While anything is queued, new mutations queue behind it so replay keeps
//! enqueue order. Reads and stock checks use the projection of the cache
//! plus the queued actions.
//!
//! A retryable failure may still have reached the remote store (the write
//! landed, the acknowledgement did not). The ledger is read before queueing
//! so such an action is reported as applied instead of queued twice.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tally_core::analytics::{
    daily_series, filter_catalog, format_receipt, items_sold_today, low_stock_items,
    top_products, trailing_days, CatalogFilter, DailyRevenue, TopProduct,
};
use tally_core::validation::{
    stock_after_restock, validate_barcode, validate_product, validate_restock_quantity,
    validate_sale_quantity, validate_store_profile,
};
use tally_core::{
    project, ActionPayload, CoreError, Money, PendingAction, Product, Projection, Route,
    SaleDelta, SaleDirection, SaleRecord, SalesReset, StoreProfile, ValidationError,
    MAX_PRICE_CENTS, TOP_PRODUCTS_LIMIT,
};

use crate::applier::MutationApplier;
use crate::cache::StoreCacheHandle;
use crate::codec::decode_sales_bucket;
use crate::config::MAX_SERIES_DAYS;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::notify::Notifier;
use crate::queue::OfflineQueue;
use crate::reconciler::ReconcilerHandle;
use crate::remote::{paths, RemoteStore};
use crate::session::SessionService;

pub const OFFLINE_NOTICE: &str = "You're offline. Changes will sync when connection returns.";
pub const SAVED_OFFLINE_NOTICE: &str =
    "Connection lost. Change saved and will sync when connection returns.";

/// Where a mutation went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Written to the remote store.
    Applied,
    /// Persisted in the offline queue.
    Queued,
}

/// Home page figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub today_revenue: Money,
    pub items_sold: i64,
    pub low_stock: Vec<Product>,
    pub top_products: Vec<TopProduct>,
}

pub struct StoreService {
    session: Arc<SessionService>,
    cache: StoreCacheHandle,
    queue: Arc<OfflineQueue>,
    applier: Arc<MutationApplier>,
    connectivity: ConnectivityMonitor,
    notifier: Arc<dyn Notifier>,
    remote: Arc<dyn RemoteStore>,
    reconciler: Option<ReconcilerHandle>,
    /// One mutation at a time, so the online-or-queue decision holds.
    mutation_lock: Mutex<()>,
}

impl StoreService {
    pub fn new(
        session: Arc<SessionService>,
        cache: StoreCacheHandle,
        queue: Arc<OfflineQueue>,
        applier: Arc<MutationApplier>,
        connectivity: ConnectivityMonitor,
        notifier: Arc<dyn Notifier>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        StoreService {
            session,
            cache,
            queue,
            applier,
            connectivity,
            notifier,
            remote,
            reconciler: None,
            mutation_lock: Mutex::new(()),
        }
    }

    /// Lets failed live writes wake the reconciler.
    pub fn with_reconciler(mut self, reconciler: ReconcilerHandle) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Cached data with the queued actions applied on top.
    pub async fn projection(&self) -> SyncResult<Projection> {
        let uid = self.authorized_uid()?;
        self.projection_for(&uid).await
    }

    pub async fn catalog(&self) -> SyncResult<Vec<Product>> {
        Ok(self.projection().await?.catalog)
    }

    pub async fn today_sales(&self) -> SyncResult<Vec<SaleRecord>> {
        Ok(self.projection().await?.today_sales)
    }

    pub async fn store_profile(&self) -> SyncResult<StoreProfile> {
        Ok(self.projection().await?.store)
    }

    pub async fn dashboard(&self) -> SyncResult<Dashboard> {
        let view = self.projection().await?;
        Ok(Dashboard {
            today_revenue: tally_core::analytics::today_revenue(&view.today_sales),
            items_sold: items_sold_today(&view.today_sales),
            low_stock: low_stock_items(&view.catalog).into_iter().cloned().collect(),
            top_products: top_products(&view.today_sales, TOP_PRODUCTS_LIMIT),
        })
    }

    pub async fn filter(&self, filter: &CatalogFilter) -> SyncResult<Vec<Product>> {
        let view = self.projection().await?;
        Ok(filter_catalog(&view.catalog, filter, Utc::now())
            .into_iter()
            .cloned()
            .collect())
    }

    /// Today's receipt as shareable text, `None` when nothing was sold.
    pub async fn receipt_text(&self) -> SyncResult<Option<String>> {
        let view = self.projection().await?;
        Ok(format_receipt(&view.store, &view.today_sales, Utc::now()))
    }

    /// Revenue for each of the trailing `days` days, oldest first.
    ///
    /// Today comes from the projection; earlier days are read from the
    /// remote store, so this fails while offline.
    pub async fn load_daily_series(&self, days: u32) -> SyncResult<Vec<DailyRevenue>> {
        if days == 0 || days > MAX_SERIES_DAYS {
            return Err(ValidationError::OutOfRange {
                field: "days".to_string(),
                min: 1,
                max: i64::from(MAX_SERIES_DAYS),
            }
            .into());
        }

        let uid = self.authorized_uid()?;
        let view = self.projection_for(&uid).await?;
        let today = self.cache.sales_day();

        let mut buckets = BTreeMap::new();
        for day in trailing_days(today, days) {
            if day == today {
                continue;
            }
            let snapshot = self.remote.get(&paths::sales_day(&uid, day)).await?;
            let decoded = decode_sales_bucket(&uid, day, snapshot.as_ref());
            if !decoded.items.is_empty() {
                buckets.insert(day, decoded.items);
            }
        }
        buckets.insert(today, view.today_sales);

        debug!(uid = %uid, days, loaded = buckets.len(), "Daily series loaded");
        Ok(daily_series(days, today, &buckets))
    }

    // =========================================================================
    // Catalog Mutations
    // =========================================================================

    /// Creates a product, or overwrites it if the barcode is known.
    pub async fn add_product(&self, product: Product) -> SyncResult<MutationOutcome> {
        let product = validate_product(&product)?;
        let uid = self.authorized_uid()?;
        self.submit(&uid, ActionPayload::AddProduct(product)).await
    }

    /// Replaces name, price and quantity of an existing product.
    pub async fn update_product(&self, product: Product) -> SyncResult<MutationOutcome> {
        let product = validate_product(&product)?;
        let uid = self.authorized_uid()?;
        self.require_product(&uid, &product.barcode).await?;
        self.submit(&uid, ActionPayload::UpdateProduct(product)).await
    }

    /// Products are never removed; deleting forces the quantity to 0.
    pub async fn delete_product(&self, barcode: &str) -> SyncResult<MutationOutcome> {
        let barcode = validate_barcode(barcode)?;
        let uid = self.authorized_uid()?;
        let mut product = self.require_product(&uid, &barcode).await?;
        product.quantity = 0;
        self.submit(&uid, ActionPayload::UpdateProduct(product)).await
    }

    /// Adds `quantity` units to an existing product. The result may not
    /// pass the stock ceiling.
    pub async fn restock(&self, barcode: &str, quantity: i64) -> SyncResult<MutationOutcome> {
        let barcode = validate_barcode(barcode)?;
        validate_restock_quantity(quantity)?;
        let uid = self.authorized_uid()?;
        let mut product = self.require_product(&uid, &barcode).await?;
        product.quantity = stock_after_restock(product.quantity, quantity)?;
        self.submit(&uid, ActionPayload::UpdateProduct(product)).await
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Sells `quantity` units. Rejected without any write when stock is short.
    pub async fn sell(
        &self,
        barcode: &str,
        quantity: i64,
    ) -> SyncResult<(SaleRecord, MutationOutcome)> {
        let barcode = validate_barcode(barcode)?;
        validate_sale_quantity(quantity)?;
        let uid = self.authorized_uid()?;

        let product = self.require_product(&uid, &barcode).await?;
        if !product.can_sell(quantity) {
            return Err(self.reject(CoreError::InsufficientStock {
                barcode,
                available: product.quantity,
                requested: quantity,
            }));
        }
        if product.price().checked_multiply_quantity(quantity).is_none() {
            return Err(ValidationError::OutOfRange {
                field: "price".to_string(),
                min: 1,
                max: MAX_PRICE_CENTS,
            }
            .into());
        }

        let sale = SaleRecord::for_product(&product, quantity, Utc::now());
        let delta = SaleDelta {
            day: sale.day(),
            sale: sale.clone(),
            direction: SaleDirection::Sell,
        };
        let outcome = self.submit(&uid, ActionPayload::SellProduct(delta)).await?;
        Ok((sale, outcome))
    }

    /// Takes a line off today's receipt and puts the units back in stock.
    pub async fn remove_sale(&self, sale_id: &str) -> SyncResult<MutationOutcome> {
        let uid = self.authorized_uid()?;
        let view = self.projection_for(&uid).await?;
        let sale = match view.sale(sale_id) {
            Some(sale) => sale.clone(),
            None => return Err(self.reject(CoreError::SaleNotFound(sale_id.to_string()))),
        };

        let delta = SaleDelta {
            day: self.cache.sales_day(),
            sale,
            direction: SaleDirection::Reverse,
        };
        self.submit(&uid, ActionPayload::SellProduct(delta)).await
    }

    /// Clears today's sales, optionally returning the sold units to stock.
    pub async fn reset_day_sales(&self, restore_stock: bool) -> SyncResult<MutationOutcome> {
        let uid = self.authorized_uid()?;
        let reset = SalesReset {
            day: self.cache.sales_day(),
            restore_stock,
        };
        self.submit(&uid, ActionPayload::ResetSales(reset)).await
    }

    // =========================================================================
    // Store Profile
    // =========================================================================

    pub async fn update_store(&self, profile: StoreProfile) -> SyncResult<MutationOutcome> {
        validate_store_profile(&profile)?;
        let uid = self.authorized_uid()?;
        let profile = StoreProfile {
            name: profile.name.trim().to_string(),
            address: profile.address.trim().to_string(),
            phone: profile.phone.trim().to_string(),
        };
        self.submit(&uid, ActionPayload::UpdateStore(profile)).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Store data is only reachable from an authorized session.
    fn authorized_uid(&self) -> SyncResult<String> {
        self.session.authorized_uid(Route::Home)
    }

    async fn projection_for(&self, uid: &str) -> SyncResult<Projection> {
        let pending = self.queue.drain(uid).await?;

        // the cache may still hold the previous account while it switches
        if self.cache.owner().as_deref() != Some(uid) {
            return Ok(project(
                &[],
                &[],
                &StoreProfile::default(),
                self.cache.sales_day(),
                &pending,
            ));
        }

        let catalog = self.cache.catalog();
        let sales = self.cache.today_sales();
        let store = self.cache.store_profile();
        Ok(project(
            &catalog,
            &sales,
            &store,
            self.cache.sales_day(),
            &pending,
        ))
    }

    async fn require_product(&self, uid: &str, barcode: &str) -> SyncResult<Product> {
        let view = self.projection_for(uid).await?;
        match view.product(barcode) {
            Some(product) => Ok(product.clone()),
            None => Err(self.reject(CoreError::ProductNotFound(barcode.to_string()))),
        }
    }

    fn reject(&self, err: CoreError) -> SyncError {
        self.notifier.error(&err.to_string());
        err.into()
    }

    async fn submit(&self, uid: &str, payload: ActionPayload) -> SyncResult<MutationOutcome> {
        let _guard = self.mutation_lock.lock().await;
        let action = PendingAction::new(payload, Utc::now());

        if !self.connectivity.is_online() {
            self.enqueue(uid, action).await?;
            self.notifier.info(OFFLINE_NOTICE);
            return Ok(MutationOutcome::Queued);
        }

        if !self.queue.is_empty(uid).await? {
            debug!(uid = %uid, "Earlier actions still queued, queueing behind them");
            self.enqueue(uid, action).await?;
            self.nudge_reconciler();
            self.notifier.info(OFFLINE_NOTICE);
            return Ok(MutationOutcome::Queued);
        }

        match self.applier.apply(uid, &action).await {
            Ok(_) => {
                self.notifier.success(&action.payload.describe());
                Ok(MutationOutcome::Applied)
            }
            Err(e) if e.is_retryable() => {
                if self.reached_remote(uid, &action).await {
                    info!(uid = %uid, action_id = %action.id, "Acknowledgement lost, ledger shows action applied");
                    self.notifier.success(&action.payload.describe());
                    return Ok(MutationOutcome::Applied);
                }
                warn!(uid = %uid, action_id = %action.id, error = %e, "Live write failed, queueing");
                self.enqueue(uid, action).await?;
                self.nudge_reconciler();
                self.notifier.info(SAVED_OFFLINE_NOTICE);
                Ok(MutationOutcome::Queued)
            }
            Err(e) => {
                self.notifier.error(&e.to_string());
                Err(e)
            }
        }
    }

    /// True when the ledger confirms `action` landed. An unreadable ledger
    /// counts as not applied; replay skips it later if it did.
    async fn reached_remote(&self, uid: &str, action: &PendingAction) -> bool {
        match self.applier.is_applied(uid, &action.id).await {
            Ok(applied) => applied,
            Err(e) => {
                debug!(uid = %uid, action_id = %action.id, error = %e, "Ledger unreadable");
                false
            }
        }
    }

    async fn enqueue(&self, uid: &str, action: PendingAction) -> SyncResult<()> {
        match self.queue.enqueue(uid, action).await {
            Ok(pending) => {
                info!(uid = %uid, pending, "Mutation stored for later sync");
                Ok(())
            }
            Err(e) => {
                self.notifier
                    .error(&format!("Could not save change on this device: {}", e));
                Err(e)
            }
        }
    }

    fn nudge_reconciler(&self) {
        if let Some(reconciler) = &self.reconciler {
            reconciler.request_sync();
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::cache::StoreCache;
    use crate::config::SyncSettings;
    use crate::connectivity::Connectivity;
    use crate::identity::MemoryIdentityProvider;
    use crate::notify::{NotificationLevel, RecordingNotifier};
    use crate::remote::MemoryRemoteStore;
    use crate::snapshot::OfflineSnapshots;
    use std::time::Duration;
    use tally_db::MemoryKeyValueStore;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        remote: Arc<MemoryRemoteStore>,
        session: Arc<SessionService>,
        cache: StoreCacheHandle,
        queue: Arc<OfflineQueue>,
        connectivity: ConnectivityMonitor,
        notifier: Arc<RecordingNotifier>,
        store: StoreService,
        uid: String,
    }

    async fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let storage = Arc::new(MemoryKeyValueStore::new());
        let activity = ActivityLog::new(remote.clone());
        let session = Arc::new(SessionService::new(
            Arc::new(MemoryIdentityProvider::new()),
            remote.clone(),
            activity.clone(),
        ));
        let connectivity = ConnectivityMonitor::new(Connectivity::Online);
        let cache = StoreCache::spawn(
            remote.clone(),
            OfflineSnapshots::new(storage.clone()),
            session.subscribe_identity(),
            connectivity.subscribe(),
            &SyncSettings::default(),
        );
        let queue = Arc::new(OfflineQueue::new(storage));
        let applier = Arc::new(MutationApplier::new(remote.clone(), activity));
        let notifier = Arc::new(RecordingNotifier::new());

        let store = StoreService::new(
            session.clone(),
            cache.clone(),
            queue.clone(),
            applier,
            connectivity.clone(),
            notifier.clone(),
            remote.clone(),
        );

        session.sign_up("owner@shop.test", "secret123").await.unwrap();
        session.set_up_pin("1234").await.unwrap();
        let uid = session.require_uid().unwrap();
        timeout(WAIT, cache.wait_until_ready(&uid)).await.unwrap().unwrap();

        Fixture {
            remote,
            session,
            cache,
            queue,
            connectivity,
            notifier,
            store,
            uid,
        }
    }

    async fn wait_for_stock(f: &Fixture, barcode: &str, quantity: i64) {
        let mut rx = f.cache.subscribe_catalog();
        timeout(
            WAIT,
            rx.wait_for(|c| c.iter().any(|p| p.barcode == barcode && p.quantity == quantity)),
        )
        .await
        .unwrap()
        .unwrap();
    }

    fn cola(quantity: i64) -> Product {
        Product::new("4006381333931", "Cola", Money::from_cents(150), quantity)
    }

    async fn remote_quantity(f: &Fixture, barcode: &str) -> Option<i64> {
        f.remote
            .peek(&format!("{}/quantity", paths::product(&f.uid, barcode)))
            .await
            .and_then(|v| v.as_i64())
    }

    #[tokio::test]
    async fn test_add_and_sell_online() {
        let f = fixture().await;
        assert_eq!(f.store.add_product(cola(10)).await.unwrap(), MutationOutcome::Applied);
        wait_for_stock(&f, "4006381333931", 10).await;

        let (sale, outcome) = f.store.sell("4006381333931", 3).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
        assert_eq!(sale.sale_quantity, 3);
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(7));

        let last = f.notifier.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Success);
        assert_eq!(last.message, "Sold Cola x3");
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_rejected_without_writes() {
        let f = fixture().await;
        f.store.add_product(cola(2)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 2).await;
        let writes = f.remote.write_count();

        let err = f.store.sell("4006381333931", 5).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Core(CoreError::InsufficientStock { available: 2, requested: 5, .. })
        ));
        assert_eq!(f.remote.write_count(), writes);
        assert!(f.queue.is_empty(&f.uid).await.unwrap());
        assert_eq!(f.notifier.last().unwrap().level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_validation_never_reaches_queue() {
        let f = fixture().await;
        f.connectivity.set_online(false);

        let bad = Product::new("4006381333931", "", Money::from_cents(150), 1);
        let err = f.store.add_product(bad).await.unwrap_err();
        assert!(err.is_user_error());

        let err = f.store.sell("4006381333931", 0).await.unwrap_err();
        assert!(err.is_user_error());
        assert!(f.queue.is_empty(&f.uid).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_mutations_queue_and_project() {
        let f = fixture().await;
        f.store.add_product(cola(5)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 5).await;

        f.connectivity.set_online(false);
        let (_, outcome) = f.store.sell("4006381333931", 2).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(f.notifier.last().unwrap().message, OFFLINE_NOTICE);

        // the projection already counts the queued sale
        let view = f.store.projection().await.unwrap();
        assert_eq!(view.product("4006381333931").unwrap().quantity, 3);
        assert_eq!(view.today_sales.len(), 1);

        let err = f.store.sell("4006381333931", 4).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::InsufficientStock { .. })));
        assert_eq!(f.queue.len(&f.uid).await.unwrap(), 1);
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(5));
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back_to_queue() {
        let f = fixture().await;
        f.store.add_product(cola(5)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 5).await;

        f.remote.set_online(false);
        let outcome = f.store.restock("4006381333931", 5).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(f.notifier.last().unwrap().message, SAVED_OFFLINE_NOTICE);
        assert_eq!(f.queue.len(&f.uid).await.unwrap(), 1);

        // later mutations queue behind it even though the monitor says online
        f.remote.set_online(true);
        let outcome = f.store.delete_product("4006381333931").await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(f.queue.len(&f.uid).await.unwrap(), 2);
        assert_eq!(
            f.store.projection().await.unwrap().product("4006381333931").unwrap().quantity,
            0
        );
    }

    #[tokio::test]
    async fn test_restock_respects_ceilings() {
        let f = fixture().await;
        f.store.add_product(cola(1)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 1).await;

        f.store.restock("4006381333931", 4).await.unwrap();
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(5));
        wait_for_stock(&f, "4006381333931", 5).await;

        let writes = f.remote.write_count();
        for amount in [i64::MAX, tally_core::MAX_STOCK_QUANTITY, 0, -3] {
            let err = f.store.restock("4006381333931", amount).await.unwrap_err();
            assert!(err.is_user_error(), "restock by {amount} should be rejected");
        }
        let err = f.store.sell("4006381333931", 1_000).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Core(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));

        assert_eq!(f.remote.write_count(), writes);
        assert!(f.queue.is_empty(&f.uid).await.unwrap());
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(5));
    }

    #[tokio::test]
    async fn test_lost_ack_on_live_write_is_not_queued() {
        let f = fixture().await;
        f.store.add_product(cola(5)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 5).await;

        f.remote.lose_next_ack();
        let (_, outcome) = f.store.sell("4006381333931", 3).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
        assert!(f.queue.is_empty(&f.uid).await.unwrap());
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(2));

        wait_for_stock(&f, "4006381333931", 2).await;
        let (_, outcome) = f.store.sell("4006381333931", 2).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(0));
    }

    #[tokio::test]
    async fn test_projection_skips_sale_remote_already_has() {
        let f = fixture().await;
        f.store.add_product(cola(5)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 5).await;

        // applied remotely but still queued, as after a crash mid-replay
        let sale = SaleRecord::for_product(&cola(5), 3, Utc::now());
        let action = PendingAction::new(
            ActionPayload::SellProduct(SaleDelta {
                day: f.cache.sales_day(),
                sale,
                direction: SaleDirection::Sell,
            }),
            Utc::now(),
        );
        let applier = MutationApplier::new(f.remote.clone(), ActivityLog::new(f.remote.clone()));
        applier.apply(&f.uid, &action).await.unwrap();
        f.queue.enqueue(&f.uid, action).await.unwrap();

        wait_for_stock(&f, "4006381333931", 2).await;
        let mut sales_rx = f.cache.subscribe_sales();
        timeout(WAIT, sales_rx.wait_for(|s| s.len() == 1)).await.unwrap().unwrap();

        let view = f.store.projection().await.unwrap();
        assert_eq!(view.product("4006381333931").unwrap().quantity, 2);
        assert_eq!(view.today_sales.len(), 1);

        let (_, outcome) = f.store.sell("4006381333931", 2).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
    }

    #[tokio::test]
    async fn test_barcode_is_stored_trimmed() {
        let f = fixture().await;
        let padded = Product::new(" 4006381333931 ", "Cola ", Money::from_cents(150), 3);
        f.store.add_product(padded).await.unwrap();

        let stored = f
            .remote
            .peek(&paths::product(&f.uid, "4006381333931"))
            .await
            .unwrap();
        assert_eq!(stored["name"], "Cola");
        wait_for_stock(&f, "4006381333931", 3).await;

        let (sale, _) = f.store.sell("4006381333931\n", 1).await.unwrap();
        assert_eq!(sale.barcode, "4006381333931");
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(2));
    }

    #[tokio::test]
    async fn test_remove_sale_and_reset() {
        let f = fixture().await;
        f.store.add_product(cola(10)).await.unwrap();
        wait_for_stock(&f, "4006381333931", 10).await;

        let (first, _) = f.store.sell("4006381333931", 2).await.unwrap();
        f.store.sell("4006381333931", 3).await.unwrap();
        let mut sales_rx = f.cache.subscribe_sales();
        timeout(WAIT, sales_rx.wait_for(|s| s.len() == 2)).await.unwrap().unwrap();

        f.store.remove_sale(&first.sale_id).await.unwrap();
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(7));
        timeout(WAIT, sales_rx.wait_for(|s| s.len() == 1)).await.unwrap().unwrap();

        f.store.reset_day_sales(true).await.unwrap();
        assert_eq!(remote_quantity(&f, "4006381333931").await, Some(10));
        timeout(WAIT, sales_rx.wait_for(|s| s.is_empty())).await.unwrap().unwrap();

        let err = f.store.remove_sale(&first.sale_id).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::SaleNotFound(_))));
    }

    #[tokio::test]
    async fn test_dashboard_and_receipt() {
        let f = fixture().await;
        f.store.add_product(cola(10)).await.unwrap();
        f.store
            .add_product(Product::new("5000112637922", "Chips", Money::from_cents(300), 4))
            .await
            .unwrap();
        wait_for_stock(&f, "5000112637922", 4).await;
        wait_for_stock(&f, "4006381333931", 10).await;

        f.connectivity.set_online(false);
        f.store.sell("4006381333931", 2).await.unwrap();
        f.store.sell("5000112637922", 1).await.unwrap();

        let dashboard = f.store.dashboard().await.unwrap();
        assert_eq!(dashboard.today_revenue, Money::from_cents(600));
        assert_eq!(dashboard.items_sold, 3);
        assert_eq!(dashboard.low_stock.len(), 1);
        assert_eq!(dashboard.top_products[0].revenue, Money::from_cents(300));

        let receipt = f.store.receipt_text().await.unwrap().unwrap();
        assert!(receipt.contains("1. Cola"));
        assert!(receipt.contains("2. Chips"));
    }

    #[tokio::test]
    async fn test_daily_series_reads_history() {
        let f = fixture().await;
        let yesterday = f.cache.sales_day().pred_opt().unwrap();
        f.remote
            .set(
                &format!("{}/old", paths::sales_day(&f.uid, yesterday)),
                serde_json::json!({
                    "barcode": "1", "name": "Tea", "priceCents": 250,
                    "saleQuantity": 2, "saleTime": Utc::now().to_rfc3339(),
                }),
            )
            .await
            .unwrap();

        let series = f.store.load_daily_series(7).await.unwrap();
        assert_eq!(series.len(), 7);
        assert_eq!(series[5].date, yesterday);
        assert_eq!(series[5].revenue, Money::from_cents(500));
        assert_eq!(series[6].revenue, Money::zero());

        assert!(f.store.load_daily_series(0).await.is_err());
    }

    #[tokio::test]
    async fn test_requires_authorized_session() {
        let f = fixture().await;
        f.session.log_out().await.unwrap();

        let err = f.store.add_product(cola(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::NotAuthenticated)));
        assert!(f.store.dashboard().await.is_err());
    }

    #[tokio::test]
    async fn test_update_store_trims_fields() {
        let f = fixture().await;
        let profile = StoreProfile {
            name: "  Corner Shop ".into(),
            address: "1 Main St".into(),
            phone: String::new(),
        };
        f.store.update_store(profile).await.unwrap();

        let stored = f.remote.peek(&paths::store_info(&f.uid)).await.unwrap();
        assert_eq!(stored["name"], "Corner Shop");

        let blank = StoreProfile {
            name: " ".into(),
            ..StoreProfile::default()
        };
        assert!(f.store.update_store(blank).await.is_err());
    }
}
