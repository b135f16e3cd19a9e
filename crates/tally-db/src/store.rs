//! # Key-Value Store
//!
//! The local persistent storage seam.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       dyn KeyValueStore                                 │
//! │                              │                                          │
//! │             ┌────────────────┴────────────────┐                         │
//! │             ▼                                 ▼                         │
//! │      KvRepository                    MemoryKeyValueStore                │
//! │      (SQLite local_kv)               (HashMap, tests and demos)         │
//! │      survives restart                survives "restart" while the       │
//! │                                      Arc is kept alive                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are opaque strings. Encoding (JSON) is the caller's business.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::{DbError, DbResult};

/// Device-scoped string storage that survives process restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// Overwrites the value. A failure means nothing was written.
    async fn set(&self, key: &str, value: &str) -> DbResult<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> DbResult<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// HashMap-backed store.
///
/// Can be switched read-only to simulate a full or locked storage medium.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set`/`remove` fail with `WriteRejected`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_writable(&self, key: &str) -> DbResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(DbError::write_rejected(key, "storage is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        self.check_writable(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        self.check_writable(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}
