//! # Sync Reconciler
//!
//! Replays the offline queue against the remote store.
//!
//! ## Replay
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  queue: [A1, A2, A3, A4]                                                │
//! │                                                                         │
//! │  apply A1 ── ok ──► remove A1                                           │
//! │  apply A2 ── ok (or already in ledger) ──► remove A2                    │
//! │  apply A3 ── FAILS ──► stop. queue: [A3, A4]                            │
//! │                                                                         │
//! │  next trigger starts again at A3                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One action at a time, each awaited before the next and taken off the
//! queue as soon as it is confirmed, so the projection never counts a
//! confirmed action twice. Actions enqueued while a replay runs are picked
//! up by the same replay.
//!
//! ## Triggers
//! - connectivity goes Offline → Online
//! - manual retry ([`ReconcilerHandle::retry_now`])
//! - the due-for-sync timer (hourly by default)
//! - backoff timer after a retryable failure
//! - identity change (the new account's queue may hold actions)

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tally_core::{ActionKind, Identity, PendingAction};

use crate::applier::{ApplyOutcome, MutationApplier};
use crate::config::SyncSettings;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::{SyncError, SyncResult};
use crate::notify::Notifier;
use crate::queue::OfflineQueue;

// =============================================================================
// Replay Report
// =============================================================================

/// The action a replay stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub error: String,
    /// False when the action will fail the same way on every retry.
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    /// Actions the ledger showed as applied by an earlier attempt.
    pub skipped_duplicates: usize,
    /// Actions still queued afterwards.
    pub remaining: usize,
    pub halted: Option<ReplayFailure>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    pub fn confirmed(&self) -> usize {
        self.applied + self.skipped_duplicates
    }
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct Reconciler {
    queue: Arc<OfflineQueue>,
    applier: Arc<MutationApplier>,
    /// At most one replay at a time.
    replay_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(queue: Arc<OfflineQueue>, applier: Arc<MutationApplier>) -> Self {
        Reconciler {
            queue,
            applier,
            replay_lock: Mutex::new(()),
        }
    }

    /// Replays `uid`'s queue in order until it is empty or an action fails.
    pub async fn replay(&self, uid: &str) -> SyncResult<ReplayReport> {
        let _guard = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();

        loop {
            let pending = self.queue.drain(uid).await?;
            if pending.is_empty() {
                break;
            }
            info!(uid = %uid, pending = pending.len(), "Replaying queued actions");

            for action in &pending {
                match self.applier.apply(uid, action).await {
                    Ok(ApplyOutcome::Applied) => report.applied += 1,
                    Ok(ApplyOutcome::AlreadyApplied) => report.skipped_duplicates += 1,
                    Err(e) => {
                        report.halted = Some(halt(action, &e));
                        break;
                    }
                }
                report.remaining = self.queue.remove_applied(uid, 1).await?;
            }

            if let Some(failure) = &report.halted {
                report.remaining = self.queue.len(uid).await?;
                warn!(
                    uid = %uid,
                    action_id = %failure.action_id,
                    kind = %failure.kind,
                    error = %failure.error,
                    retryable = failure.retryable,
                    remaining = report.remaining,
                    "Replay halted"
                );
                return Ok(report);
            }
        }

        if report.confirmed() > 0 {
            self.queue.mark_synced(uid, Utc::now()).await?;
            info!(
                uid = %uid,
                applied = report.applied,
                skipped = report.skipped_duplicates,
                "Replay complete"
            );
        }
        Ok(report)
    }

    /// Drops the head action without applying it. For a head the remote
    /// store rejects on every attempt.
    pub async fn discard_head(&self, uid: &str) -> SyncResult<Option<PendingAction>> {
        let _guard = self.replay_lock.lock().await;
        self.queue.discard_head(uid).await
    }
}

fn halt(action: &PendingAction, error: &SyncError) -> ReplayFailure {
    ReplayFailure {
        action_id: action.id,
        kind: action.kind(),
        error: error.to_string(),
        retryable: error.is_retryable(),
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current reconciler status for external queries.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Actions queued for the signed-in account after the last replay.
    pub pending: usize,

    pub last_sync: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    pub last_report: Option<ReplayReport>,

    /// A backoff retry is scheduled.
    pub retry_scheduled: bool,
}

// =============================================================================
// Agent
// =============================================================================

enum Command {
    RetryNow,
    Shutdown,
}

/// Handle for controlling a running reconciler agent.
#[derive(Clone)]
pub struct ReconcilerHandle {
    cmd_tx: mpsc::Sender<Command>,
    status: Arc<RwLock<SyncStatus>>,
}

impl ReconcilerHandle {
    /// Replays now, whatever the timers say.
    pub async fn retry_now(&self) -> SyncResult<()> {
        self.cmd_tx
            .send(Command::RetryNow)
            .await
            .map_err(|_| SyncError::ChannelError("Reconciler command channel closed".into()))
    }

    /// Asks for a replay without waiting. A request already in the channel
    /// covers this one.
    pub fn request_sync(&self) {
        if self.cmd_tx.try_send(Command::RetryNow).is_err() {
            debug!("Sync request not sent, one is already pending");
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub async fn shutdown(&self) {
        if self.cmd_tx.send(Command::Shutdown).await.is_err() {
            debug!("Reconciler already stopped");
        }
    }
}

/// Background task deciding when to replay.
pub struct ReconcilerAgent {
    reconciler: Arc<Reconciler>,
    queue: Arc<OfflineQueue>,
    settings: SyncSettings,
    connectivity: ConnectivityMonitor,
    connectivity_rx: watch::Receiver<Connectivity>,
    identity_rx: watch::Receiver<Option<Identity>>,
    notifier: Arc<dyn Notifier>,
    status: Arc<RwLock<SyncStatus>>,
    cmd_rx: mpsc::Receiver<Command>,
    backoff: ExponentialBackoff,
    retry_at: Option<Instant>,
}

impl ReconcilerAgent {
    /// Starts the agent on the current runtime.
    pub fn spawn(
        reconciler: Arc<Reconciler>,
        queue: Arc<OfflineQueue>,
        settings: SyncSettings,
        connectivity: ConnectivityMonitor,
        identity_rx: watch::Receiver<Option<Identity>>,
        notifier: Arc<dyn Notifier>,
    ) -> ReconcilerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let status = Arc::new(RwLock::new(SyncStatus::default()));

        let agent = ReconcilerAgent {
            reconciler,
            queue,
            backoff: settings.backoff(),
            settings,
            connectivity_rx: connectivity.subscribe(),
            connectivity,
            identity_rx,
            notifier,
            status: status.clone(),
            cmd_rx,
            retry_at: None,
        };
        tokio::spawn(agent.run());

        ReconcilerHandle { cmd_tx, status }
    }

    async fn run(mut self) {
        info!("Reconciler started");

        let mut online = *self.connectivity_rx.borrow_and_update() == Connectivity::Online;
        self.identity_rx.borrow_and_update();

        let mut due = tokio::time::interval(self.settings.due_interval());
        due.set_missed_tick_behavior(MissedTickBehavior::Delay);
        due.tick().await;

        // a previous run may have left actions behind
        self.sync("startup").await;

        loop {
            let retry = sleep_until(self.retry_at);

            tokio::select! {
                res = self.connectivity_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                    let now_online = *self.connectivity_rx.borrow_and_update() == Connectivity::Online;
                    let reconnected = now_online && !online;
                    online = now_online;

                    if reconnected {
                        self.backoff.reset();
                        self.retry_at = None;
                        if self.settings.replay_on_reconnect {
                            self.sync("reconnect").await;
                        }
                    }
                }

                res = self.identity_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                    self.identity_rx.borrow_and_update();
                    self.backoff.reset();
                    self.retry_at = None;
                    self.sync("identity").await;
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::RetryNow) => self.sync("manual").await,
                    Some(Command::Shutdown) | None => break,
                },

                _ = due.tick() => {
                    if self.is_due().await {
                        self.sync("due").await;
                    }
                }

                _ = retry => {
                    self.retry_at = None;
                    self.sync("backoff").await;
                }
            }
        }

        info!("Reconciler stopped");
    }

    fn current_uid(&self) -> Option<String> {
        self.identity_rx.borrow().as_ref().map(|i| i.uid.clone())
    }

    async fn is_due(&self) -> bool {
        let Some(uid) = self.current_uid() else {
            return false;
        };
        match self
            .queue
            .is_due_for_sync(&uid, self.settings.due_interval(), Utc::now())
            .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Could not read last sync time");
                false
            }
        }
    }

    async fn sync(&mut self, trigger: &'static str) {
        let Some(uid) = self.current_uid() else {
            debug!(trigger, "No identity, nothing to replay");
            return;
        };
        if !self.connectivity.is_online() {
            debug!(trigger, "Offline, replay deferred");
            return;
        }

        debug!(uid = %uid, trigger, "Replay triggered");
        match self.reconciler.replay(&uid).await {
            Ok(report) => self.handle_report(&uid, report).await,
            Err(e) => {
                error!(uid = %uid, error = %e, "Replay failed");
                let retryable = e.is_retryable();
                self.status.write().await.last_error = Some(e.to_string());
                if retryable {
                    self.schedule_retry().await;
                }
            }
        }
    }

    async fn handle_report(&mut self, uid: &str, report: ReplayReport) {
        let last_sync = self.queue.last_sync_timestamp(uid).await.unwrap_or(None);

        {
            let mut s = self.status.write().await;
            s.pending = report.remaining;
            s.last_sync = last_sync;
            s.last_error = report.halted.as_ref().map(|f| f.error.clone());
            s.last_report = Some(report.clone());
        }

        match &report.halted {
            None => {
                self.backoff.reset();
                self.retry_at = None;
                self.status.write().await.retry_scheduled = false;

                let synced = report.confirmed();
                if synced > 0 {
                    self.notifier
                        .success(&format!("Synced {} offline change(s)", synced));
                }
            }
            Some(failure) if failure.retryable => {
                if self.retry_at.is_none() && report.confirmed() == 0 {
                    self.notifier
                        .info("Sync paused. Will retry when the connection recovers.");
                }
                self.schedule_retry().await;
            }
            Some(failure) => {
                self.retry_at = None;
                self.status.write().await.retry_scheduled = false;
                self.notifier.error(&format!(
                    "Sync stopped: {}. {} change(s) still waiting.",
                    failure.error, report.remaining
                ));
            }
        }
    }

    async fn schedule_retry(&mut self) {
        match self.backoff.next_backoff() {
            Some(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "Replay retry scheduled");
                self.retry_at = Some(Instant::now() + delay);
                self.status.write().await.retry_scheduled = true;
            }
            None => {
                error!("Backoff exhausted");
                self.retry_at = None;
            }
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::codec::encode;
    use crate::notify::{NotificationLevel, RecordingNotifier};
    use crate::remote::{paths, MemoryRemoteStore, RemoteStore};
    use std::time::Duration;
    use tally_core::{
        ActionPayload, Money, Product, SaleDelta, SaleDirection, SaleRecord, StoreProfile,
    };
    use tally_db::MemoryKeyValueStore;
    use tokio::time::timeout;

    const UID: &str = "u1";
    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        remote: Arc<MemoryRemoteStore>,
        queue: Arc<OfflineQueue>,
        reconciler: Arc<Reconciler>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryKeyValueStore::new())));
        let applier = Arc::new(MutationApplier::new(
            remote.clone(),
            ActivityLog::new(remote.clone()),
        ));
        let reconciler = Arc::new(Reconciler::new(queue.clone(), applier));
        Fixture {
            remote,
            queue,
            reconciler,
        }
    }

    fn cola() -> Product {
        Product::new("111", "Cola", Money::from_cents(150), 10)
    }

    fn add(product: Product) -> PendingAction {
        PendingAction::new(ActionPayload::AddProduct(product), Utc::now())
    }

    fn sell(product: &Product, qty: i64) -> PendingAction {
        let sale = SaleRecord::for_product(product, qty, Utc::now());
        PendingAction::new(
            ActionPayload::SellProduct(SaleDelta {
                day: sale.day(),
                sale,
                direction: SaleDirection::Sell,
            }),
            Utc::now(),
        )
    }

    async fn quantity(remote: &MemoryRemoteStore, barcode: &str) -> Option<i64> {
        remote
            .peek(&format!("{}/quantity", paths::product(UID, barcode)))
            .await
            .and_then(|v| v.as_i64())
    }

    #[tokio::test]
    async fn test_replays_in_order_and_clears() {
        let f = fixture();
        f.queue.enqueue(UID, add(cola())).await.unwrap();
        f.queue.enqueue(UID, sell(&cola(), 3)).await.unwrap();
        f.queue.enqueue(UID, sell(&cola(), 2)).await.unwrap();

        let report = f.reconciler.replay(UID).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.applied, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(quantity(&f.remote, "111").await, Some(5));
        assert!(f.queue.is_empty(UID).await.unwrap());
        assert!(f.queue.last_sync_timestamp(UID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_halts_and_keeps_suffix() {
        let f = fixture();
        let first = add(cola());
        let second = sell(&cola(), 1);
        let third = sell(&cola(), 1);
        for action in [&first, &second, &third] {
            f.queue.enqueue(UID, action.clone()).await.unwrap();
        }

        // first action's write goes through, the next one fails
        f.remote.fail_writes_after(Some(1));
        let report = f.reconciler.replay(UID).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.remaining, 2);
        let failure = report.halted.unwrap();
        assert_eq!(failure.action_id, second.id);
        assert!(failure.retryable);

        let left = f.queue.drain(UID).await.unwrap();
        assert_eq!(left, vec![second, third]);
        assert!(f.queue.last_sync_timestamp(UID).await.unwrap().is_none());

        f.remote.fail_writes_after(None);
        let report = f.reconciler.replay(UID).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(quantity(&f.remote, "111").await, Some(8));
    }

    #[tokio::test]
    async fn test_lost_ack_is_not_applied_twice() {
        let f = fixture();
        f.remote
            .set(&paths::product(UID, "111"), encode(&cola()).unwrap())
            .await
            .unwrap();
        f.queue.enqueue(UID, sell(&cola(), 4)).await.unwrap();

        // the write lands but the caller sees a failure
        f.remote.lose_next_ack();
        let report = f.reconciler.replay(UID).await.unwrap();
        assert!(report.halted.is_some());
        assert_eq!(f.queue.len(UID).await.unwrap(), 1);
        assert_eq!(quantity(&f.remote, "111").await, Some(6));

        let report = f.reconciler.replay(UID).await.unwrap();
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(quantity(&f.remote, "111").await, Some(6));
        assert!(f.queue.is_empty(UID).await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_failure_and_discard() {
        let f = fixture();
        // no such product remotely: the sale can never apply
        let doomed = sell(&cola(), 1);
        let store = PendingAction::new(
            ActionPayload::UpdateStore(StoreProfile {
                name: "Corner Shop".into(),
                ..StoreProfile::default()
            }),
            Utc::now(),
        );
        f.queue.enqueue(UID, doomed.clone()).await.unwrap();
        f.queue.enqueue(UID, store).await.unwrap();

        let report = f.reconciler.replay(UID).await.unwrap();
        let failure = report.halted.unwrap();
        assert!(!failure.retryable);
        assert_eq!(report.remaining, 2);

        let dropped = f.reconciler.discard_head(UID).await.unwrap().unwrap();
        assert_eq!(dropped.id, doomed.id);

        let report = f.reconciler.replay(UID).await.unwrap();
        assert!(report.is_complete());
        let stored = f.remote.peek(&paths::store_info(UID)).await.unwrap();
        assert_eq!(stored["name"], "Corner Shop");
    }

    /// Records the queue length each time a write reaches the remote store.
    struct QueueAwareRemote {
        inner: Arc<MemoryRemoteStore>,
        queue: Arc<OfflineQueue>,
        seen: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl RemoteStore for QueueAwareRemote {
        async fn get(&self, path: &str) -> SyncResult<crate::remote::Snapshot> {
            self.inner.get(path).await
        }
        async fn set(&self, path: &str, value: serde_json::Value) -> SyncResult<()> {
            self.inner.set(path, value).await
        }
        async fn update(
            &self,
            path: &str,
            fields: serde_json::Map<String, serde_json::Value>,
        ) -> SyncResult<()> {
            self.inner.update(path, fields).await
        }
        async fn push(&self, path: &str, value: serde_json::Value) -> SyncResult<String> {
            self.inner.push(path, value).await
        }
        async fn remove(&self, path: &str) -> SyncResult<()> {
            self.inner.remove(path).await
        }
        async fn update_many(
            &self,
            updates: std::collections::BTreeMap<String, serde_json::Value>,
        ) -> SyncResult<()> {
            let pending = self.queue.len(UID).await?;
            self.seen.lock().unwrap().push(pending);
            self.inner.update_many(updates).await
        }
        async fn subscribe(&self, path: &str) -> SyncResult<crate::remote::Subscription> {
            self.inner.subscribe(path).await
        }
    }

    #[tokio::test]
    async fn test_confirmed_actions_leave_queue_one_by_one() {
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryKeyValueStore::new())));
        let remote = Arc::new(QueueAwareRemote {
            inner: Arc::new(MemoryRemoteStore::new()),
            queue: queue.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let applier = Arc::new(MutationApplier::new(
            remote.clone(),
            ActivityLog::new(remote.inner.clone()),
        ));
        let reconciler = Reconciler::new(queue.clone(), applier);

        queue.enqueue(UID, add(cola())).await.unwrap();
        queue.enqueue(UID, sell(&cola(), 3)).await.unwrap();
        queue.enqueue(UID, sell(&cola(), 2)).await.unwrap();

        let report = reconciler.replay(UID).await.unwrap();
        assert_eq!(report.applied, 3);
        // each write saw the earlier actions already gone
        assert_eq!(*remote.seen.lock().unwrap(), vec![3, 2, 1]);
        assert!(queue.is_empty(UID).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_no_op() {
        let f = fixture();
        let report = f.reconciler.replay(UID).await.unwrap();
        assert_eq!(report, ReplayReport::default());
        assert_eq!(f.remote.write_count(), 0);
    }

    // =========================================================================
    // Agent
    // =========================================================================

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            initial_backoff_ms: 20,
            max_backoff_secs: 1,
            ..SyncSettings::default()
        }
    }

    async fn wait_until_drained(queue: &OfflineQueue) {
        timeout(WAIT, async {
            while !queue.is_empty(UID).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_agent_replays_on_reconnect() {
        let f = fixture();
        let connectivity = ConnectivityMonitor::new(Connectivity::Offline);
        let (_identity_tx, identity_rx) = watch::channel(Some(Identity::new(UID, None)));
        let notifier = Arc::new(RecordingNotifier::new());

        let handle = ReconcilerAgent::spawn(
            f.reconciler.clone(),
            f.queue.clone(),
            fast_settings(),
            connectivity.clone(),
            identity_rx,
            notifier.clone(),
        );

        f.queue.enqueue(UID, add(cola())).await.unwrap();
        f.queue.enqueue(UID, sell(&cola(), 4)).await.unwrap();

        connectivity.set_online(true);
        wait_until_drained(&f.queue).await;
        assert_eq!(quantity(&f.remote, "111").await, Some(6));

        let status = handle.status().await;
        assert_eq!(status.pending, 0);
        assert!(status.last_sync.is_some());
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Success);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_agent_retries_with_backoff() {
        let f = fixture();
        let connectivity = ConnectivityMonitor::new(Connectivity::Online);
        let (_identity_tx, identity_rx) = watch::channel(Some(Identity::new(UID, None)));

        f.remote.set_online(false);
        f.queue.enqueue(UID, add(cola())).await.unwrap();

        let handle = ReconcilerAgent::spawn(
            f.reconciler.clone(),
            f.queue.clone(),
            fast_settings(),
            connectivity,
            identity_rx,
            Arc::new(RecordingNotifier::new()),
        );

        handle.retry_now().await.unwrap();
        timeout(WAIT, async {
            while !handle.status().await.retry_scheduled {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        f.remote.set_online(true);
        wait_until_drained(&f.queue).await;
        assert_eq!(quantity(&f.remote, "111").await, Some(10));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_agent_ignores_offline_triggers() {
        let f = fixture();
        let connectivity = ConnectivityMonitor::new(Connectivity::Offline);
        let (_identity_tx, identity_rx) = watch::channel(Some(Identity::new(UID, None)));
        f.queue.enqueue(UID, add(cola())).await.unwrap();

        let handle = ReconcilerAgent::spawn(
            f.reconciler.clone(),
            f.queue.clone(),
            fast_settings(),
            connectivity,
            identity_rx,
            Arc::new(RecordingNotifier::new()),
        );

        handle.retry_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.queue.len(UID).await.unwrap(), 1);
        assert_eq!(f.remote.write_count(), 0);

        handle.shutdown().await;
    }
}
