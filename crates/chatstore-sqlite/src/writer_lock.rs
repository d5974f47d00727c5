//! The single-writer interlock.
//!
//! SQLite permits at most one write transaction at a time even in WAL
//! mode. Three actors in this crate write: the ingest worker (one event
//! per transaction), the retention sweep (one deleted batch per
//! transaction), and the orphan sweeper (one deleted set per
//! transaction). All three acquire this lock before opening a
//! transaction and hold it for the transaction's lifetime, standing in
//! for "the engine's tracked-transaction primitive" that a driver with
//! direct access to `sqlite3_get_autocommit` would consult instead.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

/// Guards the single write transaction slot.
#[derive(Debug, Default)]
pub struct WriteLock {
    inner: Mutex<()>,
}

impl WriteLock {
    /// Create a new, unheld lock.
    pub fn new() -> Self {
        Self { inner: Mutex::new(()) }
    }

    /// Acquire the lock, waiting indefinitely. Used by ingest, which has
    /// no timeout by design — the upstream IRC socket is the natural
    /// rate limiter.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    /// Attempt to acquire the lock, polling every `interval` up to
    /// `retries` times before giving up. Used by retention GC, which
    /// must not stall ingest indefinitely.
    pub async fn try_acquire_with_retry(
        &self,
        retries: u32,
        interval: Duration,
    ) -> Option<MutexGuard<'_, ()>> {
        for attempt in 0..=retries {
            if let Ok(guard) = self.inner.try_lock() {
                return Some(guard);
            }
            if attempt == retries {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        None
    }
}
