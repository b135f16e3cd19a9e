//! # Store Data Cache
//!
//! In-memory copy of the signed-in account's catalog, today's sales bucket
//! and store profile, kept current by remote subscriptions.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        StoreCache task                                  │
//! │                                                                         │
//! │  identity watch ──► reset all, restore offline snapshots                │
//! │                          │                                              │
//! │                          ▼                                              │
//! │         subscribe users/{uid}/stock ─────────► catalog  watch<Arc<..>>  │
//! │         subscribe users/{uid}/sales/{today} ─► sales    watch<Arc<..>>  │
//! │         subscribe users/{uid}/storeInfo ─────► profile  watch<Arc<..>>  │
//! │                          │                                              │
//! │          rollover tick: new day ──► resubscribe sales bucket            │
//! │          subscription failed/lost ► backoff, or reconnect, resubscribe  │
//! │          identity change ─────────► drop subscriptions, start over      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Each collection is replaced wholesale per snapshot; readers never see
//!   a half-applied update. The three collections update independently.
//! - On identity change every collection is emptied (profile back to the
//!   default) before the new account's data arrives.
//! - `loading` stays true until the first sales snapshot for the identity.
//! - A failed or closed subscription is retried with exponential backoff
//!   for as long as the identity stays the same. Connectivity coming back
//!   cuts the current wait short.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tally_core::{Identity, Product, SaleRecord, StoreProfile};

use crate::codec::{decode_catalog, decode_sales_bucket, decode_store_profile};
use crate::config::SyncSettings;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::remote::{paths, RemoteStore, Snapshot, Subscription};
use crate::snapshot::OfflineSnapshots;

// =============================================================================
// Channels
// =============================================================================

struct CacheSenders {
    owner: watch::Sender<Option<String>>,
    catalog: watch::Sender<Arc<Vec<Product>>>,
    sales: watch::Sender<Arc<Vec<SaleRecord>>>,
    store: watch::Sender<Arc<StoreProfile>>,
    sales_day: watch::Sender<NaiveDate>,
    loading: watch::Sender<bool>,
}

/// Read side of the cache. Cheap to clone.
#[derive(Clone)]
pub struct StoreCacheHandle {
    owner: watch::Receiver<Option<String>>,
    catalog: watch::Receiver<Arc<Vec<Product>>>,
    sales: watch::Receiver<Arc<Vec<SaleRecord>>>,
    store: watch::Receiver<Arc<StoreProfile>>,
    sales_day: watch::Receiver<NaiveDate>,
    loading: watch::Receiver<bool>,
    quarantined: Arc<AtomicUsize>,
    shutdown_tx: mpsc::Sender<()>,
}

impl StoreCacheHandle {
    /// Uid the cached data belongs to.
    pub fn owner(&self) -> Option<String> {
        self.owner.borrow().clone()
    }

    pub fn catalog(&self) -> Arc<Vec<Product>> {
        self.catalog.borrow().clone()
    }

    pub fn today_sales(&self) -> Arc<Vec<SaleRecord>> {
        self.sales.borrow().clone()
    }

    pub fn store_profile(&self) -> Arc<StoreProfile> {
        self.store.borrow().clone()
    }

    /// Day of the sales bucket currently followed.
    pub fn sales_day(&self) -> NaiveDate {
        *self.sales_day.borrow()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Remote records skipped because they could not be decoded.
    pub fn quarantined(&self) -> usize {
        self.quarantined.load(Ordering::Relaxed)
    }

    pub fn subscribe_catalog(&self) -> watch::Receiver<Arc<Vec<Product>>> {
        self.catalog.clone()
    }

    pub fn subscribe_sales(&self) -> watch::Receiver<Arc<Vec<SaleRecord>>> {
        self.sales.clone()
    }

    pub fn subscribe_store(&self) -> watch::Receiver<Arc<StoreProfile>> {
        self.store.clone()
    }

    /// Waits until the cache holds `uid`'s data and the first sales
    /// snapshot has arrived.
    pub async fn wait_until_ready(&self, uid: &str) -> SyncResult<()> {
        let closed = |_| SyncError::ChannelError("cache task stopped".into());

        let mut owner = self.owner.clone();
        owner
            .wait_for(|o| o.as_deref() == Some(uid))
            .await
            .map_err(closed)?;

        let mut loading = self.loading.clone();
        loading.wait_for(|l| !*l).await.map_err(closed)?;
        Ok(())
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Cache shutdown channel closed".into()))
    }
}

// =============================================================================
// Cache Task
// =============================================================================

enum Flow {
    IdentityChanged,
    Shutdown,
}

pub struct StoreCache {
    remote: Arc<dyn RemoteStore>,
    snapshots: OfflineSnapshots,
    identity_rx: watch::Receiver<Option<Identity>>,
    connectivity_rx: watch::Receiver<Connectivity>,
    rollover_check: Duration,
    resubscribe: ExponentialBackoff,
    tx: CacheSenders,
    quarantined: Arc<AtomicUsize>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl StoreCache {
    /// Starts the cache task on the current runtime.
    pub fn spawn(
        remote: Arc<dyn RemoteStore>,
        snapshots: OfflineSnapshots,
        identity_rx: watch::Receiver<Option<Identity>>,
        connectivity_rx: watch::Receiver<Connectivity>,
        settings: &SyncSettings,
    ) -> StoreCacheHandle {
        let today = Utc::now().date_naive();
        let (owner_tx, owner_rx) = watch::channel(None);
        let (catalog_tx, catalog_rx) = watch::channel(Arc::new(Vec::new()));
        let (sales_tx, sales_rx) = watch::channel(Arc::new(Vec::new()));
        let (store_tx, store_rx) = watch::channel(Arc::new(StoreProfile::default()));
        let (day_tx, day_rx) = watch::channel(today);
        let (loading_tx, loading_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let quarantined = Arc::new(AtomicUsize::new(0));

        let cache = StoreCache {
            remote,
            snapshots,
            identity_rx,
            connectivity_rx,
            rollover_check: settings.rollover_check(),
            resubscribe: settings.backoff(),
            tx: CacheSenders {
                owner: owner_tx,
                catalog: catalog_tx,
                sales: sales_tx,
                store: store_tx,
                sales_day: day_tx,
                loading: loading_tx,
            },
            quarantined: quarantined.clone(),
            shutdown_rx,
        };
        tokio::spawn(cache.run());

        StoreCacheHandle {
            owner: owner_rx,
            catalog: catalog_rx,
            sales: sales_rx,
            store: store_rx,
            sales_day: day_rx,
            loading: loading_rx,
            quarantined,
            shutdown_tx,
        }
    }

    async fn run(mut self) {
        info!("Store cache started");

        loop {
            let identity = self.identity_rx.borrow_and_update().clone();
            self.reset(identity.as_ref().map(|i| i.uid.clone()));

            let flow = match identity {
                None => self.wait_for_identity().await,
                Some(identity) => self.follow(&identity.uid).await,
            };

            if let Flow::Shutdown = flow {
                break;
            }
        }

        info!("Store cache stopped");
    }

    fn reset(&self, owner: Option<String>) {
        debug!(owner = ?owner, "Resetting store cache");
        self.tx.loading.send_replace(owner.is_some());
        self.tx.catalog.send_replace(Arc::new(Vec::new()));
        self.tx.sales.send_replace(Arc::new(Vec::new()));
        self.tx.store.send_replace(Arc::new(StoreProfile::default()));
        self.tx.owner.send_replace(owner);
    }

    async fn wait_for_identity(&mut self) -> Flow {
        tokio::select! {
            res = self.identity_rx.changed() => {
                if res.is_ok() { Flow::IdentityChanged } else { Flow::Shutdown }
            }
            _ = self.shutdown_rx.recv() => Flow::Shutdown,
        }
    }

    async fn follow(&mut self, uid: &str) -> Flow {
        let mut today = Utc::now().date_naive();
        self.tx.sales_day.send_replace(today);
        self.restore_offline(uid, today).await;

        let mut retry = self.resubscribe.clone();
        retry.reset();

        loop {
            let (mut stock, mut sales, mut store) = match self.subscribe_all(uid, today).await {
                Ok(subs) => subs,
                Err(e) => {
                    warn!(uid = %uid, error = %e, "Could not subscribe to remote data");
                    self.tx.loading.send_replace(false);
                    if let Some(flow) = self.pause(&mut retry).await {
                        return flow;
                    }
                    today = self.roll_day(today);
                    continue;
                }
            };
            retry.reset();

            self.apply_catalog(uid, stock.current()).await;
            self.apply_store(uid, store.current()).await;
            self.apply_sales(uid, today, sales.current()).await;
            info!(uid = %uid, day = %today, "Store cache loaded");

            let mut rollover = tokio::time::interval(self.rollover_check);
            rollover.set_missed_tick_behavior(MissedTickBehavior::Delay);
            rollover.tick().await;

            let lost = loop {
                tokio::select! {
                    snap = stock.changed() => match snap {
                        Ok(snap) => self.apply_catalog(uid, snap).await,
                        Err(e) => break e,
                    },

                    snap = sales.changed() => match snap {
                        Ok(snap) => self.apply_sales(uid, today, snap).await,
                        Err(e) => break e,
                    },

                    snap = store.changed() => match snap {
                        Ok(snap) => self.apply_store(uid, snap).await,
                        Err(e) => break e,
                    },

                    _ = rollover.tick() => {
                        let now = Utc::now().date_naive();
                        if now != today {
                            match self.remote.subscribe(&paths::sales_day(uid, now)).await {
                                Ok(sub) => {
                                    info!(uid = %uid, from = %today, to = %now, "Sales day rolled over");
                                    today = now;
                                    sales = sub;
                                    self.tx.sales_day.send_replace(today);
                                    self.apply_sales(uid, today, sales.current()).await;
                                }
                                Err(e) => warn!(error = %e, "Sales rollover resubscribe failed, will retry"),
                            }
                        }
                    }

                    res = self.identity_rx.changed() => {
                        return if res.is_ok() { Flow::IdentityChanged } else { Flow::Shutdown };
                    }

                    _ = self.shutdown_rx.recv() => return Flow::Shutdown,
                }
            };

            warn!(uid = %uid, error = %lost, "Remote subscription closed, resubscribing");
            drop((stock, sales, store));
            if let Some(flow) = self.pause(&mut retry).await {
                return flow;
            }
            today = self.roll_day(today);
        }
    }

    async fn subscribe_all(
        &self,
        uid: &str,
        today: NaiveDate,
    ) -> SyncResult<(Subscription, Subscription, Subscription)> {
        let stock = self.remote.subscribe(&paths::stock(uid)).await?;
        let sales = self.remote.subscribe(&paths::sales_day(uid, today)).await?;
        let store = self.remote.subscribe(&paths::store_info(uid)).await?;
        Ok((stock, sales, store))
    }

    /// Waits out the next backoff delay before a resubscribe.
    ///
    /// Returns early with `None` when connectivity is back online (a
    /// reconnect seen while subscribed counts too), or with the flow to take
    /// when the identity changes or the cache is shut down.
    async fn pause(&mut self, retry: &mut ExponentialBackoff) -> Option<Flow> {
        let delay = retry.next_backoff().unwrap_or(retry.max_interval);
        debug!(delay_ms = delay.as_millis() as u64, "Resubscribe scheduled");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return None,

                res = self.connectivity_rx.changed() => {
                    if res.is_err() {
                        return Some(Flow::Shutdown);
                    }
                    if *self.connectivity_rx.borrow_and_update() == Connectivity::Online {
                        debug!("Connectivity back, resubscribing now");
                        return None;
                    }
                }

                res = self.identity_rx.changed() => {
                    return Some(if res.is_ok() { Flow::IdentityChanged } else { Flow::Shutdown });
                }

                _ = self.shutdown_rx.recv() => return Some(Flow::Shutdown),
            }
        }
    }

    fn roll_day(&self, today: NaiveDate) -> NaiveDate {
        let now = Utc::now().date_naive();
        if now != today {
            self.tx.sales_day.send_replace(now);
        }
        now
    }

    async fn restore_offline(&self, uid: &str, today: NaiveDate) {
        if let Some(catalog) = self.snapshots.load_catalog(uid).await {
            debug!(uid = %uid, products = catalog.len(), "Restored offline catalog");
            self.tx.catalog.send_replace(Arc::new(catalog));
        }
        if let Some(sales) = self.snapshots.load_sales(uid, today).await {
            self.tx.sales.send_replace(Arc::new(sales));
        }
        if let Some(profile) = self.snapshots.load_store_profile(uid).await {
            self.tx.store.send_replace(Arc::new(profile));
        }
    }

    fn quarantine(&self, count: usize) {
        if count > 0 {
            self.quarantined.fetch_add(count, Ordering::Relaxed);
        }
    }

    async fn apply_catalog(&self, uid: &str, snapshot: Snapshot) {
        let decoded = decode_catalog(uid, snapshot.as_ref());
        self.quarantine(decoded.quarantined);

        if let Err(e) = self.snapshots.save_catalog(uid, &decoded.items).await {
            warn!(error = %e, "Offline catalog snapshot not saved");
        }
        debug!(uid = %uid, products = decoded.items.len(), "Catalog snapshot");
        self.tx.catalog.send_replace(Arc::new(decoded.items));
    }

    async fn apply_sales(&self, uid: &str, day: NaiveDate, snapshot: Snapshot) {
        let decoded = decode_sales_bucket(uid, day, snapshot.as_ref());
        self.quarantine(decoded.quarantined);

        if let Err(e) = self.snapshots.save_sales(uid, day, &decoded.items).await {
            warn!(error = %e, "Offline sales snapshot not saved");
        }
        debug!(uid = %uid, day = %day, sales = decoded.items.len(), "Sales snapshot");
        self.tx.sales.send_replace(Arc::new(decoded.items));
        self.tx.loading.send_replace(false);
    }

    async fn apply_store(&self, uid: &str, snapshot: Snapshot) {
        let decoded = decode_store_profile(uid, snapshot.as_ref());
        self.quarantine(decoded.quarantined);

        if let Err(e) = self.snapshots.save_store_profile(uid, &decoded.items).await {
            warn!(error = %e, "Offline store profile snapshot not saved");
        }
        self.tx.store.send_replace(Arc::new(decoded.items));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
