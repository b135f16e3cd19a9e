//! # Offline Queue
//!
//! Durable FIFO of mutations made while the remote store was unreachable.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    local_kv (tally-db)                                  │
//! │                                                                         │
//! │  key                              │ value                               │
//! │  ─────────────────────────────────┼──────────────────────────────────── │
//! │  tally:{uid}:pending_actions      │ [{id, type, payload, enqueuedAt}]   │
//! │  tally:{uid}:last_sync            │ "2024-03-09T10:30:00Z"              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Order is enqueue order. Nothing is reordered, merged or deduplicated.
//! - `enqueue` either persists the whole new queue or returns the error;
//!   callers must tell the user when it fails.
//! - Only the reconciler removes actions, and only a confirmed prefix.
//! - Each account has its own queue, so switching accounts never replays
//!   one account's changes into another.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tally_core::PendingAction;
use tally_db::KeyValueStore;

use crate::error::{SyncError, SyncResult};

fn queue_key(uid: &str) -> String {
    format!("tally:{}:pending_actions", uid)
}

fn last_sync_key(uid: &str) -> String {
    format!("tally:{}:last_sync", uid)
}

/// Persistent pending-action queue shared by the store service and the
/// reconciler.
pub struct OfflineQueue {
    storage: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles on the stored array.
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        OfflineQueue {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Appends an action. Returns the new queue length.
    pub async fn enqueue(&self, uid: &str, action: PendingAction) -> SyncResult<usize> {
        let _guard = self.write_lock.lock().await;

        let mut actions = self.load(uid).await?;
        let id = action.id;
        let kind = action.kind();
        actions.push(action);
        self.store(uid, &actions).await?;

        info!(uid = %uid, action_id = %id, kind = %kind, pending = actions.len(), "Action queued");
        Ok(actions.len())
    }

    /// Current contents in FIFO order. Nothing is removed.
    pub async fn drain(&self, uid: &str) -> SyncResult<Vec<PendingAction>> {
        self.load(uid).await
    }

    pub async fn clear(&self, uid: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.remove(&queue_key(uid)).await?;
        debug!(uid = %uid, "Offline queue cleared");
        Ok(())
    }

    pub async fn is_empty(&self, uid: &str) -> SyncResult<bool> {
        Ok(self.len(uid).await? == 0)
    }

    pub async fn len(&self, uid: &str) -> SyncResult<usize> {
        Ok(self.load(uid).await?.len())
    }

    /// Drops the first `n` actions after the remote store confirmed them.
    /// Returns how many remain.
    pub async fn remove_applied(&self, uid: &str, n: usize) -> SyncResult<usize> {
        if n == 0 {
            return self.len(uid).await;
        }

        let _guard = self.write_lock.lock().await;
        let mut actions = self.load(uid).await?;
        let n = n.min(actions.len());
        actions.drain(..n);

        if actions.is_empty() {
            self.storage.remove(&queue_key(uid)).await?;
        } else {
            self.store(uid, &actions).await?;
        }

        debug!(uid = %uid, removed = n, remaining = actions.len(), "Applied actions removed");
        Ok(actions.len())
    }

    /// Removes and returns the head action without applying it.
    pub async fn discard_head(&self, uid: &str) -> SyncResult<Option<PendingAction>> {
        let _guard = self.write_lock.lock().await;
        let mut actions = self.load(uid).await?;
        if actions.is_empty() {
            return Ok(None);
        }

        let head = actions.remove(0);
        if actions.is_empty() {
            self.storage.remove(&queue_key(uid)).await?;
        } else {
            self.store(uid, &actions).await?;
        }

        warn!(uid = %uid, action_id = %head.id, kind = %head.kind(), "Pending action discarded");
        Ok(Some(head))
    }

    // =========================================================================
    // Sync Bookkeeping
    // =========================================================================

    /// When the queue was last fully replayed.
    pub async fn last_sync_timestamp(&self, uid: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.storage.get(&last_sync_key(uid)).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(uid = %uid, value = %raw, error = %e, "Ignoring malformed last sync timestamp");
                Ok(None)
            }
        }
    }

    pub async fn mark_synced(&self, uid: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.storage
            .set(&last_sync_key(uid), &at.to_rfc3339())
            .await?;
        Ok(())
    }

    /// True if never synced or the last sync is at least `interval` old.
    pub async fn is_due_for_sync(
        &self,
        uid: &str,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> SyncResult<bool> {
        let Some(last) = self.last_sync_timestamp(uid).await? else {
            return Ok(true);
        };

        let interval = ChronoDuration::from_std(interval)
            .map_err(|e| SyncError::InvalidConfig(format!("sync interval: {}", e)))?;
        Ok(now - last >= interval)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn load(&self, uid: &str) -> SyncResult<Vec<PendingAction>> {
        let Some(raw) = self.storage.get(&queue_key(uid)).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw).map_err(|e| SyncError::QueueCorrupted {
            uid: uid.to_string(),
            reason: e.to_string(),
        })
    }

    async fn store(&self, uid: &str, actions: &[PendingAction]) -> SyncResult<()> {
        let raw = serde_json::to_string(actions)?;
        self.storage.set(&queue_key(uid), &raw).await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
