//! End-to-end offline flow: sell while offline, restart, reconnect, replay.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{Money, Product, SessionState};
use tally_db::{Database, DbConfig, KeyValueStore};
use tally_sync::remote::paths;
use tally_sync::{
    AppConfig, AppContext, Connectivity, ConnectivityMonitor, MemoryIdentityProvider,
    MemoryRemoteStore, MutationOutcome,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);
const BARCODE: &str = "4006381333931";

struct Backend {
    remote: Arc<MemoryRemoteStore>,
    identity: Arc<MemoryIdentityProvider>,
    storage: Arc<dyn KeyValueStore>,
}

impl Backend {
    async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Backend {
            remote: Arc::new(MemoryRemoteStore::new()),
            identity: Arc::new(MemoryIdentityProvider::new()),
            storage: Arc::new(db.local_storage()),
        }
    }

    async fn start(&self, initial: Connectivity) -> AppContext {
        AppContext::builder(AppConfig::in_memory())
            .with_remote(self.remote.clone())
            .with_identity_provider(self.identity.clone())
            .with_storage(self.storage.clone())
            .with_connectivity(ConnectivityMonitor::new(initial))
            .build()
            .await
            .unwrap()
    }

    async fn remote_quantity(&self, uid: &str) -> Option<i64> {
        self.remote
            .peek(&format!("{}/quantity", paths::product(uid, BARCODE)))
            .await
            .and_then(|v| v.as_i64())
    }
}

async fn wait_until_synced(app: &AppContext, uid: &str) {
    timeout(WAIT, async {
        while !app.queue.is_empty(uid).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue was not replayed in time");
}

#[tokio::test]
async fn test_offline_sales_survive_restart_and_replay_once() {
    let backend = Backend::new().await;

    // first run: set up the account and the catalog online
    let app = backend.start(Connectivity::Online).await;
    app.session.sign_up("owner@shop.test", "secret123").await.unwrap();
    assert_eq!(app.session.state(), SessionState::AuthenticatedNoPin);
    app.session.set_up_pin("1234").await.unwrap();
    let uid = app.session.require_uid().unwrap();
    timeout(WAIT, app.cache.wait_until_ready(&uid)).await.unwrap().unwrap();

    let cola = Product::new(BARCODE, "Cola", Money::from_cents(150), 10);
    assert_eq!(
        app.store.add_product(cola).await.unwrap(),
        MutationOutcome::Applied
    );
    let mut catalog = app.cache.subscribe_catalog();
    timeout(WAIT, catalog.wait_for(|c| c.iter().any(|p| p.barcode == BARCODE)))
        .await
        .unwrap()
        .unwrap();

    // connection drops; two sales go to the queue
    app.connectivity.set_online(false);
    backend.remote.set_online(false);
    let (_, first) = app.store.sell(BARCODE, 3).await.unwrap();
    let (_, second) = app.store.sell(BARCODE, 2).await.unwrap();
    assert_eq!(first, MutationOutcome::Queued);
    assert_eq!(second, MutationOutcome::Queued);
    assert!(app.store.sell(BARCODE, 6).await.is_err());
    assert_eq!(app.queue.len(&uid).await.unwrap(), 2);
    app.shutdown().await;

    // second run starts offline from the same device storage
    backend.remote.set_online(true);
    let app = backend.start(Connectivity::Offline).await;
    let state = app.session.log_in("owner@shop.test", "secret123").await.unwrap();
    assert_eq!(state, SessionState::PinPending);
    assert!(!app.session.verify_pin("9999").await.unwrap());
    assert!(app.session.verify_pin("1234").await.unwrap());
    timeout(WAIT, app.cache.wait_until_ready(&uid)).await.unwrap().unwrap();

    assert_eq!(app.queue.len(&uid).await.unwrap(), 2);
    let view = app.store.projection().await.unwrap();
    assert_eq!(view.product(BARCODE).unwrap().quantity, 5);
    assert_eq!(backend.remote_quantity(&uid).await, Some(10));

    // reconnect: the queue is replayed in order
    app.connectivity.set_online(true);
    wait_until_synced(&app, &uid).await;
    assert_eq!(backend.remote_quantity(&uid).await, Some(5));
    assert!(app.queue.last_sync_timestamp(&uid).await.unwrap().is_some());

    // an acknowledgement lost mid-replay does not sell the unit twice
    app.connectivity.set_online(false);
    app.store.sell(BARCODE, 1).await.unwrap();
    backend.remote.lose_next_ack();
    app.connectivity.set_online(true);
    wait_until_synced(&app, &uid).await;
    assert_eq!(backend.remote_quantity(&uid).await, Some(4));

    let today = app.cache.sales_day();
    let bucket = backend.remote.peek(&paths::sales_day(&uid, today)).await.unwrap();
    assert_eq!(bucket.as_object().unwrap().len(), 3);

    app.shutdown().await;
}

#[tokio::test]
async fn test_accounts_do_not_share_queues() {
    let backend = Backend::new().await;
    let app = backend.start(Connectivity::Online).await;

    app.session.sign_up("first@shop.test", "secret123").await.unwrap();
    app.session.set_up_pin("1111").await.unwrap();
    let first_uid = app.session.require_uid().unwrap();
    timeout(WAIT, app.cache.wait_until_ready(&first_uid)).await.unwrap().unwrap();

    app.connectivity.set_online(false);
    app.store
        .add_product(Product::new(BARCODE, "Cola", Money::from_cents(150), 10))
        .await
        .unwrap();
    assert_eq!(app.queue.len(&first_uid).await.unwrap(), 1);

    app.session.log_out().await.unwrap();
    app.session.sign_up("second@shop.test", "secret123").await.unwrap();
    app.session.set_up_pin("2222").await.unwrap();
    let second_uid = app.session.require_uid().unwrap();
    timeout(WAIT, app.cache.wait_until_ready(&second_uid)).await.unwrap().unwrap();

    assert!(app.queue.is_empty(&second_uid).await.unwrap());
    assert!(app.store.catalog().await.unwrap().is_empty());
    assert_eq!(app.queue.len(&first_uid).await.unwrap(), 1);

    app.shutdown().await;
}
