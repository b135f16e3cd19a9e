//! # Application Context
//!
//! Builds every service once at start-up and wires them together.
//!
//! ```text
//!   AppConfig ──► local storage (SQLite or given) ──► OfflineQueue
//!                                                   └► OfflineSnapshots
//!   RemoteStore ──► ActivityLog ──► MutationApplier ──► Reconciler
//!   IdentityProvider ──► SessionService ──identity──► StoreCache
//!                                       └──identity──► ReconcilerAgent
//!   all of the above ──► StoreService
//! ```
//!
//! The context owns the background tasks; call [`AppContext::shutdown`]
//! before dropping it.

use std::sync::Arc;
use tracing::info;

use tally_db::{Database, DbConfig, KeyValueStore};

use crate::activity::ActivityLog;
use crate::applier::MutationApplier;
use crate::cache::{StoreCache, StoreCacheHandle};
use crate::config::AppConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityProvider;
use crate::notify::{NoOpNotifier, Notifier};
use crate::queue::OfflineQueue;
use crate::reconciler::{Reconciler, ReconcilerAgent, ReconcilerHandle};
use crate::remote::RemoteStore;
use crate::session::SessionService;
use crate::snapshot::OfflineSnapshots;
use crate::store::StoreService;

/// The running application core.
pub struct AppContext {
    pub config: AppConfig,
    pub connectivity: ConnectivityMonitor,
    pub session: Arc<SessionService>,
    pub store: Arc<StoreService>,
    pub cache: StoreCacheHandle,
    pub queue: Arc<OfflineQueue>,
    pub reconciler: Arc<Reconciler>,
    pub sync: ReconcilerHandle,
    database: Option<Database>,
}

impl AppContext {
    pub fn builder(config: AppConfig) -> AppContextBuilder {
        AppContextBuilder::new(config)
    }

    /// Stops background tasks and closes the local database.
    pub async fn shutdown(&self) {
        info!("Shutting down application context");
        self.sync.shutdown().await;
        if let Err(e) = self.cache.shutdown().await {
            tracing::debug!(error = %e, "Cache already stopped");
        }
        if let Some(db) = &self.database {
            db.close().await;
        }
    }
}

/// Builder for [`AppContext`]. The remote store and the identity provider
/// are required; everything else has a default.
pub struct AppContextBuilder {
    config: AppConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    connectivity: Option<ConnectivityMonitor>,
}

impl AppContextBuilder {
    pub fn new(config: AppConfig) -> Self {
        AppContextBuilder {
            config,
            remote: None,
            identity: None,
            storage: None,
            notifier: None,
            connectivity: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Uses `storage` instead of opening the configured SQLite database.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Opens storage and starts the cache and reconciler tasks. Must run
    /// inside a Tokio runtime.
    pub async fn build(self) -> SyncResult<AppContext> {
        self.config.validate()?;

        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;
        let identity = self
            .identity
            .ok_or_else(|| SyncError::InvalidConfig("Identity provider required".into()))?;
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoOpNotifier));
        let connectivity = self.connectivity.unwrap_or_default();

        let (storage, database) = match self.storage {
            Some(storage) => (storage, None),
            None => {
                let db_config = if self.config.storage.in_memory {
                    DbConfig::in_memory()
                } else {
                    DbConfig::new(self.config.storage.resolve_database_path()?)
                };
                let db = Database::new(db_config).await?;
                let storage: Arc<dyn KeyValueStore> = Arc::new(db.local_storage());
                (storage, Some(db))
            }
        };

        let activity = ActivityLog::new(remote.clone());
        let queue = Arc::new(OfflineQueue::new(storage.clone()));
        let applier = Arc::new(MutationApplier::new(remote.clone(), activity.clone()));
        let reconciler = Arc::new(Reconciler::new(queue.clone(), applier.clone()));
        let session = Arc::new(SessionService::new(identity, remote.clone(), activity));

        let cache = StoreCache::spawn(
            remote.clone(),
            OfflineSnapshots::new(storage),
            session.subscribe_identity(),
            connectivity.subscribe(),
            &self.config.sync,
        );

        let sync = ReconcilerAgent::spawn(
            reconciler.clone(),
            queue.clone(),
            self.config.sync.clone(),
            connectivity.clone(),
            session.subscribe_identity(),
            notifier.clone(),
        );

        let store = StoreService::new(
            session.clone(),
            cache.clone(),
            queue.clone(),
            applier,
            connectivity.clone(),
            notifier,
            remote,
        )
        .with_reconciler(sync.clone());

        info!(
            persistent = database.is_some(),
            replay_on_reconnect = self.config.sync.replay_on_reconnect,
            "Application context ready"
        );

        Ok(AppContext {
            config: self.config,
            connectivity,
            session,
            store: Arc::new(store),
            cache,
            queue,
            reconciler,
            sync,
            database,
        })
    }
}
