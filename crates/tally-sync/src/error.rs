//! # Sync Error Types
//!
//! Error types for everything that talks to local storage or the cloud
//! backend.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │     Domain              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  Core (validation,      │ │
//! │  │  ConfigLoad/Save│  │  Rejected       │  │  stock, session)        │ │
//! │  │                 │  │  MalformedRecord│  │  AuthFailed             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Local Storage  │  │     Queue       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Storage(DbErr) │  │  QueueCorrupted │  │  ChannelError           │ │
//! │  │                 │  │  Offline        │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type for services, the offline queue and the reconciler.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Validation, stock, session and lookup failures from tally-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The identity provider refused the request.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // =========================================================================
    // Remote Store Errors
    // =========================================================================
    /// The remote store could not be reached. Nothing is known to be written.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote store refused the write (rules, quota).
    #[error("Remote store rejected write to {path}: {reason}")]
    RemoteRejected { path: String, reason: String },

    /// A remote record could not be decoded.
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    // =========================================================================
    // Local Storage / Queue Errors
    // =========================================================================
    /// Local persistent storage failed.
    #[error("Local storage error: {0}")]
    Storage(#[from] DbError),

    /// The persisted queue could not be decoded.
    #[error("Offline queue for {uid} is corrupted: {reason}")]
    QueueCorrupted { uid: String, reason: String },

    /// The device is offline and the operation needs the remote store.
    #[error("Device is offline")]
    Offline,

    /// Failed to serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A background task is shutting down.
    #[error("Background task is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the same operation may succeed later unchanged.
    ///
    /// ## Retryable Errors
    /// - Remote store unreachable, device offline
    /// - Local storage pool exhaustion
    ///
    /// ## Non-Retryable Errors
    /// - Validation and stock errors (the action itself is wrong)
    /// - Remote rejections and malformed records
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_)
                | SyncError::Offline
                | SyncError::Storage(DbError::PoolExhausted)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the user can fix this by changing their input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SyncError::Core(_) | SyncError::AuthFailed(_))
    }
}
