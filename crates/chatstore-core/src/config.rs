//! Typed configuration accepted by storage drivers.
//!
//! Sourcing these values (file, env, CLI flags) is the surrounding
//! bouncer's job; this crate only validates and consumes the struct.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default number of rows a single query returns when the caller does not
/// specify a length.
pub const DEFAULT_QUERY_LIMIT: u32 = 50;

/// Maximum number of event rows deleted by one retention transaction.
///
/// Chosen so that `GC_BATCH_SIZE * 5` (one payload reference per deleted
/// row, five ref columns) stays comfortably under SQLite's default
/// 999-bound-parameter limit.
pub const GC_BATCH_SIZE: usize = 150;

/// Number of 100ms polls the GC loop spends waiting for the write lock
/// before giving up on a cleanup cycle.
pub const GC_WRITE_LOCK_RETRIES: u32 = 50;

/// Configuration accepted by `chatstore-sqlite::ChatStore::init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database: String,

    /// Retention period for channel buffers, in days. `0` disables
    /// retention for this class.
    pub retention_days_channel: u32,

    /// Retention period for private-message buffers, in days. `0`
    /// disables retention for this class.
    pub retention_days_pm: u32,

    /// How often the retention GC runs, in minutes.
    pub retention_cleanup_interval: u32,

    /// Approximate byte budget (in KiB) for the in-memory dedup cache.
    pub cache_size_kb: u32,

    /// SQLite `mmap_size` PRAGMA value in bytes. `0` disables mmap I/O.
    pub mmap_size_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "chathistory.db".to_string(),
            retention_days_channel: 0,
            retention_days_pm: 0,
            retention_cleanup_interval: 1440,
            cache_size_kb: 2000,
            mmap_size_bytes: 0,
        }
    }
}

impl Config {
    /// Validate the configuration, rejecting values that would make the
    /// store misbehave rather than failing lazily deep inside GC.
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(StoreError::Config("database path must not be empty".into()));
        }
        if self.retention_cleanup_interval == 0 {
            return Err(StoreError::Config(
                "retention_cleanup_interval must be at least 1 minute".into(),
            ));
        }
        Ok(())
    }
}
