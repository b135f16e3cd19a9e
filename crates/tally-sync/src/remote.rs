//! # Remote Store
//!
//! The seam to the cloud realtime database: a hierarchical JSON tree
//! addressed by slash-separated paths, with snapshot subscriptions.
//!
//! ## Tree Layout
//! ```text
//! users/{uid}/
//!   ├── stock/{barcode}            Product
//!   ├── sales/{YYYY-MM-DD}/{saleId} SaleRecord
//!   ├── storeInfo                  StoreProfile
//!   ├── pin                        "1234"
//!   ├── activityLog/{pushId}       ActivityEntry
//!   └── appliedActions/{actionId}  replay ledger
//! ```
//!
//! ## Write Semantics
//! - Writing `null` removes the node. Empty objects do not exist.
//! - `update_many` applies every path or none.
//! - Every subscriber of a path gets the full snapshot after each change.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::{watch, RwLock};
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};

/// Value at a path, `None` when nothing is stored there.
pub type Snapshot = Option<Value>;

/// The cloud backend's data API.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &str) -> SyncResult<Snapshot>;

    /// Replaces the node at `path`. `Value::Null` removes it.
    async fn set(&self, path: &str, value: Value) -> SyncResult<()>;

    /// Merges `fields` into the node at `path`. Keys may be relative paths.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> SyncResult<()>;

    /// Appends `value` under a generated, chronologically ordered key.
    async fn push(&self, path: &str, value: Value) -> SyncResult<String>;

    async fn remove(&self, path: &str) -> SyncResult<()>;

    /// Writes every `path → value` pair atomically. Paths must not nest.
    async fn update_many(&self, updates: BTreeMap<String, Value>) -> SyncResult<()>;

    /// Subscribes to full snapshots of `path`, starting with the current one.
    async fn subscribe(&self, path: &str) -> SyncResult<Subscription>;
}

// =============================================================================
// Subscription
// =============================================================================

/// Live view of one path. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: watch::Receiver<Snapshot>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, rx: watch::Receiver<Snapshot>) -> Self {
        Subscription {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The latest snapshot, marking it as seen.
    pub fn current(&mut self) -> Snapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Waits for the next snapshot.
    pub async fn changed(&mut self) -> SyncResult<Snapshot> {
        self.rx.changed().await.map_err(|_| {
            SyncError::ChannelError(format!("subscription to {} closed", self.path))
        })?;
        Ok(self.current())
    }
}

// =============================================================================
// Paths
// =============================================================================

/// Path builders for the per-account tree.
pub mod paths {
    use chrono::NaiveDate;
    use tally_core::types::day_key;
    use uuid::Uuid;

    fn user_root(uid: &str) -> String {
        format!("users/{}", uid)
    }

    pub fn stock(uid: &str) -> String {
        format!("{}/stock", user_root(uid))
    }

    pub fn product(uid: &str, barcode: &str) -> String {
        format!("{}/stock/{}", user_root(uid), barcode)
    }

    pub fn sales_day(uid: &str, day: NaiveDate) -> String {
        format!("{}/sales/{}", user_root(uid), day_key(day))
    }

    pub fn sale(uid: &str, day: NaiveDate, sale_id: &str) -> String {
        format!("{}/sales/{}/{}", user_root(uid), day_key(day), sale_id)
    }

    pub fn store_info(uid: &str) -> String {
        format!("{}/storeInfo", user_root(uid))
    }

    pub fn pin(uid: &str) -> String {
        format!("{}/pin", user_root(uid))
    }

    pub fn activity_log(uid: &str) -> String {
        format!("{}/activityLog", user_root(uid))
    }

    pub fn applied_action(uid: &str, id: &Uuid) -> String {
        format!("{}/appliedActions/{}", user_root(uid), id)
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

struct Watcher {
    path: String,
    tx: watch::Sender<Snapshot>,
}

#[derive(Default)]
struct Tree {
    root: Value,
    watchers: Vec<Watcher>,
}

impl Tree {
    fn read(&self, path: &str) -> Snapshot {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.as_object()?.get(seg)?;
        }
        if node.is_null() {
            None
        } else {
            Some(node.clone())
        }
    }

    fn write(&mut self, path: &str, value: Value) {
        let segs = segments(path);
        write_at(&mut self.root, &segs, value);
    }

    /// Pushes fresh snapshots to subscribers whose view changed.
    fn notify(&mut self) {
        self.watchers.retain(|w| !w.tx.is_closed());

        for i in 0..self.watchers.len() {
            let snapshot = self.read(&self.watchers[i].path);
            self.watchers[i].tx.send_if_modified(|current| {
                if *current != snapshot {
                    *current = snapshot;
                    true
                } else {
                    false
                }
            });
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Drops null and empty-object children, the way the backend stores data.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !is_vacant(v))
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

fn write_at(node: &mut Value, segs: &[&str], value: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = prune(value);
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Object(map) = node {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
        if is_vacant(child) {
            map.remove(*head);
        }
    }
}

fn is_ancestor(ancestor: &str, path: &str) -> bool {
    let a = segments(ancestor);
    let p = segments(path);
    a.len() < p.len() && p.starts_with(&a)
}

/// In-process remote store for tests and offline demos.
///
/// ## Fault Injection
/// - `set_online(false)`: every read and write fails with `RemoteUnavailable`
///   (subscriptions stay attached)
/// - `fail_writes_after(n)`: the next `n` writes succeed, later ones fail
/// - `lose_next_ack()`: the next write is applied but reported as failed
/// - `refuse_subscriptions(true)`: new subscriptions fail
/// - `drop_subscribers()`: closes every attached subscription
pub struct MemoryRemoteStore {
    tree: RwLock<Tree>,
    offline: AtomicBool,
    refuse_subscribe: AtomicBool,
    /// Writes left before injected failures start; negative = disabled.
    fail_after: AtomicI64,
    lose_ack: AtomicBool,
    writes: AtomicU64,
    push_seq: AtomicU64,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        MemoryRemoteStore {
            tree: RwLock::new(Tree::default()),
            offline: AtomicBool::new(false),
            refuse_subscribe: AtomicBool::new(false),
            fail_after: AtomicI64::new(-1),
            lose_ack: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            push_seq: AtomicU64::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        debug!(online, "Memory remote store connectivity changed");
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Lets `n` more writes through, then fails every write. `None` clears.
    pub fn fail_writes_after(&self, n: Option<usize>) {
        let value = n.map(|n| n as i64).unwrap_or(-1);
        self.fail_after.store(value, Ordering::SeqCst);
    }

    pub fn lose_next_ack(&self) {
        self.lose_ack.store(true, Ordering::SeqCst);
    }

    /// Number of writes that reached the tree.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reads a path ignoring connectivity and fault injection.
    pub async fn peek(&self, path: &str) -> Snapshot {
        self.tree.read().await.read(path)
    }

    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscribe.store(refuse, Ordering::SeqCst);
    }

    pub async fn drop_subscribers(&self) {
        let mut tree = self.tree.write().await;
        let dropped = tree.watchers.len();
        tree.watchers.clear();
        debug!(dropped, "Memory remote store dropped its subscribers");
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut tree = self.tree.write().await;
        tree.watchers.retain(|w| !w.tx.is_closed());
        tree.watchers.len()
    }

    fn check_reachable(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteUnavailable("network unreachable".into()));
        }
        Ok(())
    }

    fn check_writable(&self) -> SyncResult<()> {
        self.check_reachable()?;

        let remaining =
            self.fail_after
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n > 0 {
                        Some(n - 1)
                    } else {
                        None
                    }
                });
        if remaining == Err(0) {
            return Err(SyncError::RemoteUnavailable("injected write failure".into()));
        }
        Ok(())
    }

    async fn commit(&self, updates: Vec<(String, Value)>) -> SyncResult<()> {
        self.check_writable()?;

        {
            let mut tree = self.tree.write().await;
            for (path, value) in updates {
                trace!(path = %path, "Remote write");
                tree.write(&path, value);
            }
            tree.notify();
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        if self.lose_ack.swap(false, Ordering::SeqCst) {
            return Err(SyncError::RemoteUnavailable(
                "connection dropped before acknowledgement".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &str) -> SyncResult<Snapshot> {
        self.check_reachable()?;
        Ok(self.tree.read().await.read(path))
    }

    async fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        self.commit(vec![(path.to_string(), value)]).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> SyncResult<()> {
        let updates = fields
            .into_iter()
            .map(|(key, value)| (format!("{}/{}", path, key), value))
            .collect();
        self.update_many(updates).await
    }

    async fn push(&self, path: &str, value: Value) -> SyncResult<String> {
        let seq = self.push_seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{:012x}-{:06}", Utc::now().timestamp_millis(), seq);
        self.commit(vec![(format!("{}/{}", path, key), value)])
            .await?;
        Ok(key)
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        self.commit(vec![(path.to_string(), Value::Null)]).await
    }

    async fn update_many(&self, updates: BTreeMap<String, Value>) -> SyncResult<()> {
        let keys: Vec<&String> = updates.keys().collect();
        for a in &keys {
            for b in &keys {
                if is_ancestor(a, b) {
                    return Err(SyncError::RemoteRejected {
                        path: (*b).clone(),
                        reason: format!("overlaps ancestor path {}", a),
                    });
                }
            }
        }

        self.commit(updates.into_iter().collect()).await
    }

    async fn subscribe(&self, path: &str) -> SyncResult<Subscription> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteUnavailable(format!(
                "subscription to {} refused",
                path
            )));
        }
        let mut tree = self.tree.write().await;
        let (tx, rx) = watch::channel(tree.read(path));
        tree.watchers.push(Watcher {
            path: path.to_string(),
            tx,
        });
        debug!(path = %path, "Remote subscription attached");
        Ok(Subscription::new(path, rx))
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tally_core::types::day_key;

    #[tokio::test]
    async fn test_set_get_and_null_removes() {
        let remote = MemoryRemoteStore::new();
        remote.set("users/u1/pin", json!("1234")).await.unwrap();
        assert_eq!(remote.get("users/u1/pin").await.unwrap(), Some(json!("1234")));

        remote.set("users/u1/pin", Value::Null).await.unwrap();
        assert_eq!(remote.get("users/u1/pin").await.unwrap(), None);
        assert_eq!(remote.get("users/u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let remote = MemoryRemoteStore::new();
        remote
            .set("users/u1/stock/1", json!({"name": "Cola", "quantity": 3}))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("quantity".into(), json!(9));
        remote.update("users/u1/stock/1", fields).await.unwrap();

        assert_eq!(
            remote.get("users/u1/stock/1").await.unwrap(),
            Some(json!({"name": "Cola", "quantity": 9}))
        );
    }

    #[tokio::test]
    async fn test_push_keys_are_ordered() {
        let remote = MemoryRemoteStore::new();
        let a = remote.push("users/u1/activityLog", json!({"action": "a"})).await.unwrap();
        let b = remote.push("users/u1/activityLog", json!({"action": "b"})).await.unwrap();
        assert!(a < b);
    }

    #[tokio::test]
    async fn test_update_many_rejects_nested_paths() {
        let remote = MemoryRemoteStore::new();
        let mut updates = BTreeMap::new();
        updates.insert("users/u1/stock".to_string(), json!({}));
        updates.insert("users/u1/stock/1/quantity".to_string(), json!(1));

        assert!(matches!(
            remote.update_many(updates).await,
            Err(SyncError::RemoteRejected { .. })
        ));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_sees_every_change() {
        let remote = MemoryRemoteStore::new();
        let mut sub = remote.subscribe("users/u1/stock").await.unwrap();
        assert_eq!(sub.current(), None);

        remote.set("users/u1/stock/1/quantity", json!(4)).await.unwrap();
        assert_eq!(sub.changed().await.unwrap(), Some(json!({"1": {"quantity": 4}})));

        // unrelated write does not wake the subscriber
        remote.set("users/u1/pin", json!("0000")).await.unwrap();
        remote.remove("users/u1/stock/1").await.unwrap();
        assert_eq!(sub.changed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_and_injected_failures() {
        let remote = MemoryRemoteStore::new();
        remote.set_online(false);
        assert!(remote.get("a").await.unwrap_err().is_retryable());
        assert!(remote.set("a", json!(1)).await.is_err());

        remote.set_online(true);
        remote.fail_writes_after(Some(1));
        remote.set("a", json!(1)).await.unwrap();
        assert!(remote.set("b", json!(2)).await.is_err());
        remote.fail_writes_after(None);
        remote.set("b", json!(2)).await.unwrap();
        assert_eq!(remote.write_count(), 2);
    }

    #[tokio::test]
    async fn test_lost_ack_still_writes() {
        let remote = MemoryRemoteStore::new();
        remote.lose_next_ack();
        assert!(remote.set("a", json!(1)).await.is_err());
        assert_eq!(remote.peek("a").await, Some(json!(1)));
        remote.set("a", json!(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_released() {
        let remote = MemoryRemoteStore::new();
        let sub = remote.subscribe("users/u1/stock").await.unwrap();
        assert_eq!(remote.subscriber_count().await, 1);
        drop(sub);
        assert_eq!(remote.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_refused_and_dropped_subscriptions() {
        let remote = MemoryRemoteStore::new();
        remote.refuse_subscriptions(true);
        assert!(remote.subscribe("users/u1/stock").await.unwrap_err().is_retryable());

        remote.refuse_subscriptions(false);
        let mut sub = remote.subscribe("users/u1/stock").await.unwrap();
        remote.drop_subscribers().await;
        assert!(sub.changed().await.is_err());
    }

    #[test]
    fn test_paths_stay_under_the_account() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let id = uuid::Uuid::nil();
        for path in [
            paths::stock("u1"),
            paths::product("u1", "111"),
            paths::sales_day("u1", day),
            paths::sale("u1", day, "s1"),
            paths::store_info("u1"),
            paths::pin("u1"),
            paths::activity_log("u1"),
            paths::applied_action("u1", &id),
        ] {
            assert!(path.starts_with("users/u1/"), "{}", path);
        }
        assert_eq!(paths::sale("u1", day, "s1"), format!("users/u1/sales/{}/s1", day_key(day)));
    }
}
