//! # tally-sync: Online/Offline Runtime for Tally POS
//!
//! Service objects between the UI and the cloud backend. Keeps the till
//! usable while the backend is unreachable and replays what happened once
//! it comes back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          AppContext                                     │
//! │                                                                         │
//! │  ┌────────────────┐   identity    ┌────────────────┐                    │
//! │  │ SessionService │──────────────►│   StoreCache   │◄── subscriptions   │
//! │  │ login, PIN gate│──────┐        │ catalog, sales,│    (RemoteStore)   │
//! │  └────────────────┘      │        │ store profile  │                    │
//! │                          │        └───────┬────────┘                    │
//! │                          │                │ watch<Arc<..>>              │
//! │                          │                ▼                             │
//! │                          │        ┌────────────────┐                    │
//! │                          │        │  StoreService  │── online ──┐       │
//! │                          │        │ validate, check│            ▼       │
//! │                          │        │ apply or queue │     MutationApplier│
//! │                          │        └───────┬────────┘            ▲       │
//! │                          │                │ offline             │       │
//! │                          │                ▼                     │       │
//! │                          │        ┌────────────────┐    ┌──────────────┐│
//! │                          └───────►│  OfflineQueue  │───►│  Reconciler  ││
//! │                                   │ (tally-db)     │    │ replay, FIFO ││
//! │                                   └────────────────┘    └──────────────┘│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Services
//! - [`app`] - `AppContext` that builds and wires everything
//! - [`session`] - Sign-up, login and the PIN gate
//! - [`store`] - Catalog, sales and store-profile operations
//! - [`cache`] - Subscription-fed copy of the account's data
//! - [`reconciler`] - Offline queue replay and its background agent
//!
//! ### Building Blocks
//! - [`queue`] - Durable per-account queue of pending actions
//! - [`snapshot`] - Last-known data for offline start-up
//! - [`applier`] - `PendingAction` → remote writes, with the idempotency ledger
//! - [`codec`] - Decoding of remote records, quarantine of malformed ones
//! - [`activity`] - Audit trail in the remote store
//!
//! ### Seams
//! - [`remote`] - `RemoteStore` trait and the in-memory implementation
//! - [`identity`] - `IdentityProvider` trait and the in-memory implementation
//! - [`notify`] - Toast notifications
//! - [`connectivity`] - Online/offline state
//!
//! ### Ambient
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//! - [`logging`] - tracing subscriber set-up
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_sync::{AppConfig, AppContext};
//!
//! let config = AppConfig::load_or_default(None);
//! tally_sync::logging::init_tracing(&config.logging);
//!
//! let app = AppContext::builder(config)
//!     .with_remote(remote)
//!     .with_identity_provider(identity)
//!     .build()
//!     .await?;
//!
//! app.session.log_in("owner@shop.test", "secret123").await?;
//! app.session.verify_pin("1234").await?;
//! let (sale, outcome) = app.store.sell("4006381333931", 2).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Services
pub mod app;
pub mod cache;
pub mod reconciler;
pub mod session;
pub mod store;

// Building blocks
pub mod activity;
pub mod applier;
pub mod codec;
pub mod queue;
pub mod snapshot;

// Seams
pub mod connectivity;
pub mod identity;
pub mod notify;
pub mod remote;

// Ambient
pub mod config;
pub mod error;
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================

pub use app::{AppContext, AppContextBuilder};
pub use applier::{ApplyOutcome, MutationApplier};
pub use cache::{StoreCache, StoreCacheHandle};
pub use config::AppConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use identity::{AuthOutcome, IdentityProvider, MemoryIdentityProvider};
pub use notify::{NoOpNotifier, Notification, NotificationLevel, Notifier, RecordingNotifier};
pub use queue::OfflineQueue;
pub use reconciler::{
    Reconciler, ReconcilerAgent, ReconcilerHandle, ReplayFailure, ReplayReport, SyncStatus,
};
pub use remote::{MemoryRemoteStore, RemoteStore, Snapshot, Subscription};
pub use session::{SessionService, SessionView};
pub use store::{Dashboard, MutationOutcome, StoreService};
