//! # tally-db: Local Storage for Tally POS
//!
//! Device-scoped persistence. Everything the app must remember across a
//! restart while it cannot reach the remote store lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Data Flow                              │
//! │                                                                         │
//! │  OfflineQueue / offline snapshots (tally-sync)                          │
//! │       │                                                                 │
//! │       │  Arc<dyn KeyValueStore>                                         │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐                    │   │
//! │  │   │   Database    │    │ KvRepository  │                    │   │
//! │  │   │   (pool.rs)   │◄───│ (SQLite impl) │                    │   │
//! │  │   └───────────────┘    └───────────────┘                    │   │
//! │  │                        ┌───────────────┐                       │   │
//! │  │                        │ MemoryKvStore │  tests and demos      │   │
//! │  │                        └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/com.tally.pos/tally.db                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Opening the database file and applying the embedded schema
//! - [`error`] - Database error types
//! - [`store`] - The `KeyValueStore` seam and its in-memory implementation
//! - [`repository`] - SQLite-backed implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig, KeyValueStore};
//!
//! let db = Database::new(DbConfig::new("path/to/tally.db")).await?;
//! let storage = db.local_storage();
//! storage.set("tally:uid-1:last_sync", "2024-03-09T10:30:00Z").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::kv::KvRepository;
pub use store::{KeyValueStore, MemoryKeyValueStore};
