//! # Repository Module
//!
//! SQLite-backed storage for Tally POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OfflineQueue                                                           │
//! │       │                                                                 │
//! │       │  storage.set("tally:uid-1:pending_actions", json)              │
//! │       ▼                                                                 │
//! │  KvRepository (impl KeyValueStore)                                      │
//! │  ├── get(&self, key)                                                    │
//! │  ├── set(&self, key, value)    UPSERT                                   │
//! │  ├── remove(&self, key)                                                 │
//! │  └── entry(&self, key)         value + last write time                  │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  local_kv table                                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`kv::KvRepository`] - Key-value blobs (queue, sync time, snapshots)

pub mod kv;
