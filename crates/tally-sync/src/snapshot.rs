//! Last-known remote data kept on the device, so the app can show the
//! catalog and today's receipt while starting up offline.
//!
//! Keys: `tally:{uid}:stock`, `tally:{uid}:sales`, `tally:{uid}:store_info`.
//! A snapshot that fails to decode is ignored, never fatal.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use tally_core::{Product, SaleRecord, StoreProfile};
use tally_db::KeyValueStore;

use crate::error::SyncResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SalesSnapshot {
    day: NaiveDate,
    sales: Vec<SaleRecord>,
}

#[derive(Clone)]
pub struct OfflineSnapshots {
    storage: Arc<dyn KeyValueStore>,
}

impl OfflineSnapshots {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        OfflineSnapshots { storage }
    }

    pub async fn save_catalog(&self, uid: &str, catalog: &[Product]) -> SyncResult<()> {
        self.save(&key(uid, "stock"), &catalog).await
    }

    pub async fn load_catalog(&self, uid: &str) -> Option<Vec<Product>> {
        self.load(&key(uid, "stock")).await
    }

    pub async fn save_sales(&self, uid: &str, day: NaiveDate, sales: &[SaleRecord]) -> SyncResult<()> {
        let snapshot = SalesSnapshot {
            day,
            sales: sales.to_vec(),
        };
        self.save(&key(uid, "sales"), &snapshot).await
    }

    /// Today's receipt, or nothing if the stored one is from another day.
    pub async fn load_sales(&self, uid: &str, today: NaiveDate) -> Option<Vec<SaleRecord>> {
        let snapshot: SalesSnapshot = self.load(&key(uid, "sales")).await?;
        (snapshot.day == today).then_some(snapshot.sales)
    }

    pub async fn save_store_profile(&self, uid: &str, profile: &StoreProfile) -> SyncResult<()> {
        self.save(&key(uid, "store_info"), profile).await
    }

    pub async fn load_store_profile(&self, uid: &str) -> Option<StoreProfile> {
        self.load(&key(uid, "store_info")).await
    }

    async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let raw = serde_json::to_string(value)?;
        self.storage.set(key, &raw).await?;
        debug!(key = %key, "Offline snapshot saved");
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %key, error = %e, "Offline snapshot unreadable");
                return None;
            }
        };

        serde_json::from_str(&raw)
            .map_err(|e| warn!(key = %key, error = %e, "Ignoring malformed offline snapshot"))
            .ok()
    }
}

fn key(uid: &str, name: &str) -> String {
    format!("tally:{}:{}", uid, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tally_core::Money;
    use tally_db::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_catalog_and_profile_round_trip() {
        let snapshots = OfflineSnapshots::new(Arc::new(MemoryKeyValueStore::new()));
        let catalog = vec![Product::new("111", "Cola", Money::from_cents(150), 3)];

        snapshots.save_catalog("u1", &catalog).await.unwrap();
        assert_eq!(snapshots.load_catalog("u1").await, Some(catalog));
        assert_eq!(snapshots.load_catalog("u2").await, None);
        assert_eq!(snapshots.load_store_profile("u1").await, None);
    }

    #[tokio::test]
    async fn test_stale_sales_day_is_ignored() {
        let snapshots = OfflineSnapshots::new(Arc::new(MemoryKeyValueStore::new()));
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let product = Product::new("111", "Cola", Money::from_cents(150), 3);
        let sales = vec![SaleRecord::for_product(&product, 1, at)];

        snapshots.save_sales("u1", at.date_naive(), &sales).await.unwrap();

        assert_eq!(snapshots.load_sales("u1", at.date_naive()).await, Some(sales));
        let tomorrow = at.date_naive().succ_opt().unwrap();
        assert_eq!(snapshots.load_sales("u1", tomorrow).await, None);
    }

    #[tokio::test]
    async fn test_garbage_is_ignored() {
        let storage = Arc::new(MemoryKeyValueStore::new());
        storage.set("tally:u1:stock", "[{]").await.unwrap();
        let snapshots = OfflineSnapshots::new(storage);

        assert_eq!(snapshots.load_catalog("u1").await, None);
    }
}
