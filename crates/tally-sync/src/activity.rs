//! Best-effort audit trail under `users/{uid}/activityLog`.

use chrono::Utc;
use std::sync::Arc;
use tally_core::ActivityEntry;
use tracing::{debug, warn};

use crate::remote::{paths, RemoteStore};

/// Appends activity entries. A failed append never fails the caller.
#[derive(Clone)]
pub struct ActivityLog {
    remote: Arc<dyn RemoteStore>,
}

impl ActivityLog {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        ActivityLog { remote }
    }

    /// Records `action` with the current time. Returns whether it was stored.
    pub async fn record(&self, uid: &str, action: &str) -> bool {
        let entry = ActivityEntry::new(action, Utc::now());

        let value = match serde_json::to_value(&entry) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Could not encode activity entry");
                return false;
            }
        };

        match self.remote.push(&paths::activity_log(uid), value).await {
            Ok(key) => {
                debug!(uid = %uid, key = %key, action = %action, "Activity logged");
                true
            }
            Err(e) => {
                warn!(uid = %uid, action = %action, error = %e, "Activity log write failed");
                false
            }
        }
    }
}
