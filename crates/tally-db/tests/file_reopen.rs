//! The file-backed store keeps what was written across a close and reopen.

use tally_db::{Database, DbConfig, KeyValueStore};

#[tokio::test]
async fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    let kv = db.local_storage();
    kv.set("tally:u1:pending_actions", "[1,2]").await.unwrap();
    kv.set("tally:u1:last_sync", "2024-03-09T10:30:00Z").await.unwrap();
    kv.set("tally:u1:pending_actions", "[2]").await.unwrap();
    kv.remove("tally:u1:last_sync").await.unwrap();
    db.close().await;

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    let kv = db.local_storage();
    assert_eq!(
        kv.get("tally:u1:pending_actions").await.unwrap().as_deref(),
        Some("[2]")
    );
    assert_eq!(kv.get("tally:u1:last_sync").await.unwrap(), None);
    assert_eq!(kv.count().await.unwrap(), 1);
    db.close().await;
}

#[tokio::test]
async fn test_missing_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("com.tally.pos").join("data").join("tally.db");

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    db.local_storage().set("k", "v").await.unwrap();
    db.close().await;

    assert!(path.exists());
}
