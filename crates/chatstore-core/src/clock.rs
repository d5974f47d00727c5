//! The clock the store consumes alongside each inbound message, used when
//! an event carries no parseable `time` tag.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::Utc;

/// A source of the current wall-clock time, injectable for deterministic
/// tests.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Convenience constructor for the default clock, boxed for storage
/// behind `Arc<dyn Clock>`.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
