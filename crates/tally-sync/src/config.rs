//! # App Configuration
//!
//! Configuration management for the app runtime.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DATABASE_PATH=/var/lib/tally/tally.db                        │
//! │     TALLY_SYNC_INTERVAL_SECS=900                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/tally.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.tally.pos/tally.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     platform data dir, hourly sync check, 7-day series                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tally.toml
//! [storage]
//! database_path = "/var/lib/tally/tally.db"
//!
//! [sync]
//! replay_on_reconnect = true
//! due_interval_secs = 3600
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//!
//! [analytics]
//! default_series_days = 7
//!
//! [logging]
//! filter = "info,tally=debug"
//! ```

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Longest analytics window the app will fetch.
pub const MAX_SERIES_DAYS: u32 = 90;

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the local key-value database lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Explicit database file. Defaults to `<data dir>/tally.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Keep everything in memory (demos, kiosks that must not persist).
    #[serde(default)]
    pub in_memory: bool,
}

impl StorageSettings {
    /// Resolves the database file path.
    pub fn resolve_database_path(&self) -> SyncResult<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }

        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.data_dir().join("tally.db"))
            .ok_or_else(|| {
                SyncError::InvalidConfig("No data directory available for tally.db".into())
            })
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Offline queue replay behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Replay the queue as soon as connectivity returns.
    #[serde(default = "default_true")]
    pub replay_on_reconnect: bool,

    /// Interval of the due-for-sync timer (seconds).
    #[serde(default = "default_due_interval")]
    pub due_interval_secs: u64,

    /// Initial backoff after a retryable replay failure (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between replay attempts (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// How often the cache checks whether today's sales bucket rolled over
    /// to a new day (seconds).
    #[serde(default = "default_rollover_check")]
    pub rollover_check_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_due_interval() -> u64 {
    3600
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_rollover_check() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            replay_on_reconnect: default_true(),
            due_interval_secs: default_due_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            rollover_check_secs: default_rollover_check(),
        }
    }
}

impl SyncSettings {
    pub fn due_interval(&self) -> Duration {
        Duration::from_secs(self.due_interval_secs)
    }

    pub fn rollover_check(&self) -> Duration {
        Duration::from_secs(self.rollover_check_secs)
    }

    /// Backoff policy for failed replays and cache resubscribes. Never
    /// gives up on its own.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_backoff_ms),
            max_interval: Duration::from_secs(self.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Analytics / Logging Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    /// Days in the analytics revenue series (7 = week view).
    #[serde(default = "default_series_days")]
    pub default_series_days: u32,
}

fn default_series_days() -> u32 {
    7
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        AnalyticsSettings {
            default_series_days: default_series_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive. `RUST_LOG` still wins when set.
    #[serde(default)]
    pub filter: Option<String>,
}

// =============================================================================
// Main App Configuration
// =============================================================================

/// Complete app configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub analytics: AnalyticsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for tests and demos: in-memory storage, fast retries.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.storage.in_memory = true;
        config.sync.initial_backoff_ms = 50;
        config.sync.max_backoff_secs = 1;
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.due_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "due_interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.rollover_check_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "rollover_check_secs must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff_ms == 0
            || self.sync.max_backoff_secs.saturating_mul(1000) < self.sync.initial_backoff_ms
        {
            return Err(SyncError::InvalidConfig(format!(
                "backoff must satisfy 0 < initial_backoff_ms ({}) <= max_backoff_secs ({}) * 1000",
                self.sync.initial_backoff_ms, self.sync.max_backoff_secs
            )));
        }

        let days = self.analytics.default_series_days;
        if days == 0 || days > MAX_SERIES_DAYS {
            return Err(SyncError::InvalidConfig(format!(
                "default_series_days must be between 1 and {}, got {}",
                MAX_SERIES_DAYS, days
            )));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies `TALLY_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("TALLY_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(flag) = lookup("TALLY_IN_MEMORY") {
            match flag.parse::<bool>() {
                Ok(v) => self.storage.in_memory = v,
                Err(_) => warn!(value = %flag, "Invalid TALLY_IN_MEMORY"),
            }
        }

        if let Some(flag) = lookup("TALLY_REPLAY_ON_RECONNECT") {
            match flag.parse::<bool>() {
                Ok(v) => self.sync.replay_on_reconnect = v,
                Err(_) => warn!(value = %flag, "Invalid TALLY_REPLAY_ON_RECONNECT"),
            }
        }

        if let Some(secs) = lookup("TALLY_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(v) => {
                    debug!(secs = v, "Overriding sync interval from environment");
                    self.sync.due_interval_secs = v;
                }
                Err(_) => warn!(value = %secs, "Invalid TALLY_SYNC_INTERVAL_SECS"),
            }
        }

        if let Some(days) = lookup("TALLY_SERIES_DAYS") {
            match days.parse::<u32>() {
                Ok(v) => self.analytics.default_series_days = v,
                Err(_) => warn!(value = %days, "Invalid TALLY_SERIES_DAYS"),
            }
        }

        if let Some(filter) = lookup("TALLY_LOG") {
            self.logging.filter = Some(filter);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("tally.toml"))
    }
}
