//! # tally-core: Pure Business Logic for Tally POS
//!
//! This crate is the **heart** of Tally POS. It contains all business logic
//! as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Web UI (mobile-styled SPA)                   │   │
//! │  │    Login ──► PIN ──► Stock ──► Sell ──► Analytics ──► Account   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               tally-sync (services, queue, reconciler)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  types   │ │ session  │ │analytics │ │ action/validation│  │   │
//! │  │   │ Product  │ │  PIN     │ │ revenue  │ │ PendingAction    │  │   │
//! │  │   │ Sale     │ │  guard   │ │ top-N    │ │ field rules      │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, SaleRecord, StoreProfile)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Form and payload validation
//! - [`session`] - PIN-gated session state machine and route guard
//! - [`analytics`] - Revenue, low stock, top products, daily series
//! - [`action`] - Offline pending actions (queued mutations)
//! - [`projection`] - Snapshots with queued actions applied (offline view)
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//!
//! let price = Money::from_cents(1099); // $10.99
//! let line = price * 3_i64;
//! assert_eq!(line.to_string(), "$32.97");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod action;
pub mod analytics;
pub mod error;
pub mod money;
pub mod projection;
pub mod session;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use action::{ActionKind, ActionPayload, PendingAction, SaleDelta, SaleDirection, SalesReset};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use projection::{project, Projection};
pub use session::{Identity, Route, RouteDecision, Session, SessionEvent, SessionState};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Quantity at or below which a product is flagged for replenishment.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

/// Number of entries shown in the "top products" list.
pub const TOP_PRODUCTS_LIMIT: usize = 5;

/// Number of digits in a session PIN.
pub const PIN_LENGTH: usize = 4;

/// Store name given to every freshly created account.
pub const DEFAULT_STORE_NAME: &str = "My Store";

/// Largest quantity on a single sale line.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Largest stock level a product may hold, and the largest single restock.
pub const MAX_STOCK_QUANTITY: i64 = 1_000_000;

/// Highest unit price accepted, in cents ($1,000,000.00).
pub const MAX_PRICE_CENTS: i64 = 100_000_000;
