//! Contractual metric names emitted by storage drivers.
//!
//! Recording happens through the `metrics` crate's facade macros; wiring
//! up an exporter (Prometheus, statsd, …) is the surrounding process's
//! responsibility.

/// Timer: wall-clock duration of a single query call.
pub const LOOKUP_TIME: &str = "messages.lookup.time";

/// Timer: wall-clock duration of a single `store` call.
pub const STORE_TIME: &str = "messages.store.time";

/// Counter: number of retention GC cycles run.
pub const RETENTION_RUNS: &str = "messages.retention.cleanup.runs";

/// Counter: number of retention GC cycles that aborted with an error.
pub const RETENTION_ERRORS: &str = "messages.retention.cleanup.errors";

/// Gauge: rows deleted by the most recent retention GC cycle.
pub const RETENTION_ROWS_DELETED: &str = "messages.retention.cleanup.rows_deleted";

/// Gauge: wall-clock duration of the most recent retention GC cycle, in
/// milliseconds.
pub const RETENTION_DURATION_MS: &str = "messages.retention.cleanup.duration_ms";
