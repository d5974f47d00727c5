//! Retention GC (C6) and the orphan sweeper (C7).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chatstore_core::config::{GC_BATCH_SIZE, GC_WRITE_LOCK_RETRIES};
use chatstore_core::metrics as metric_names;
use sqlx::{Row, SqlitePool};

use crate::dedup::DedupCache;
use crate::writer_lock::WriteLock;

/// Which buffer class a retention pass targets. Classification is by the
/// leading byte of the buffer-name payload: `#` or `&` denotes a
/// channel, anything else a private-message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClass {
    /// Channel buffers (`#…` / `&…`).
    Channel,
    /// Private-message buffers.
    Pm,
}

impl BufferClass {
    fn matches_sql_fragment(self) -> &'static str {
        match self {
            BufferClass::Channel => "(substr(p.bytes, 1, 1) = X'23' OR substr(p.bytes, 1, 1) = X'26')",
            BufferClass::Pm => "NOT (substr(p.bytes, 1, 1) = X'23' OR substr(p.bytes, 1, 1) = X'26')",
        }
    }
}

/// Guards against overlapping retention passes: ticks that arrive while
/// a previous cycle is still running are dropped rather than queued.
#[derive(Debug, Default)]
pub struct RetentionGuard {
    running: AtomicBool,
}

impl RetentionGuard {
    /// Create a new, idle guard.
    pub fn new() -> Self {
        Self { running: AtomicBool::new(false) }
    }

    /// Try to enter a retention cycle. Returns `false` if one is already
    /// in progress.
    pub fn try_enter(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Leave the current retention cycle.
    pub fn leave(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Delete up to [`GC_BATCH_SIZE`] expired events of `class` and return
/// the set of payload ids the deleted rows referenced. Callers run the
/// orphan sweep over the returned ids afterward.
async fn delete_one_batch(
    pool: &SqlitePool,
    write_lock: &WriteLock,
    class: BufferClass,
    cutoff_ms: i64,
) -> Result<(u64, HashSet<i64>), sqlx::Error> {
    let Some(_guard) = write_lock
        .try_acquire_with_retry(GC_WRITE_LOCK_RETRIES, Duration::from_millis(100))
        .await
    else {
        // No dedicated "lock busy" variant exists on sqlx::Error; reuse
        // PoolTimedOut, which carries the same meaning here (a bounded
        // wait for exclusive write access expired).
        return Err(sqlx::Error::PoolTimedOut);
    };

    let sql = format!(
        "DELETE FROM events WHERE rowid IN ( \
           SELECT e.rowid FROM events e JOIN payloads p ON p.id = e.buffer_ref \
           WHERE e.time < ?1 AND {} LIMIT ?2 \
         ) RETURNING buffer_ref, tags_ref, data_ref, prefix_ref, params_ref",
        class.matches_sql_fragment()
    );

    let rows = sqlx::query(&sql)
        .bind(cutoff_ms)
        .bind(GC_BATCH_SIZE as i64)
        .fetch_all(pool)
        .await?;

    let row_count = rows.len() as u64;
    let mut ids = HashSet::new();
    for row in &rows {
        ids.insert(row.get::<i64, _>("buffer_ref"));
        ids.insert(row.get::<i64, _>("tags_ref"));
        ids.insert(row.get::<i64, _>("data_ref"));
        ids.insert(row.get::<i64, _>("prefix_ref"));
        ids.insert(row.get::<i64, _>("params_ref"));
    }
    Ok((row_count, ids))
}

/// Delete any of `candidates` that no event references in any of its
/// five ref columns. Written as five correlated `NOT EXISTS` clauses, one
/// per ref column, so the planner can use each column's own index
/// instead of degrading to a full scan.
pub async fn orphan_sweep(
    pool: &SqlitePool,
    write_lock: &WriteLock,
    cache: &tokio::sync::Mutex<DedupCache>,
    candidates: &HashSet<i64>,
) -> Result<u64, sqlx::Error> {
    if candidates.is_empty() {
        return Ok(0);
    }

    let Some(_guard) = write_lock
        .try_acquire_with_retry(GC_WRITE_LOCK_RETRIES, Duration::from_millis(100))
        .await
    else {
        // No dedicated "lock busy" variant exists on sqlx::Error; reuse
        // PoolTimedOut, which carries the same meaning here (a bounded
        // wait for exclusive write access expired).
        return Err(sqlx::Error::PoolTimedOut);
    };

    let placeholders: Vec<String> = (1..=candidates.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "DELETE FROM payloads WHERE id IN ({}) \
           AND NOT EXISTS (SELECT 1 FROM events WHERE events.buffer_ref = payloads.id) \
           AND NOT EXISTS (SELECT 1 FROM events WHERE events.tags_ref = payloads.id) \
           AND NOT EXISTS (SELECT 1 FROM events WHERE events.data_ref = payloads.id) \
           AND NOT EXISTS (SELECT 1 FROM events WHERE events.prefix_ref = payloads.id) \
           AND NOT EXISTS (SELECT 1 FROM events WHERE events.params_ref = payloads.id)",
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql);
    for id in candidates {
        query = query.bind(*id);
    }
    let result = query.execute(pool).await?;
    let deleted = result.rows_affected();

    if deleted > 0 {
        cache.lock().await.clear();
    }

    Ok(deleted)
}

/// Run one full retention cycle for a single buffer class: repeatedly
/// delete batches and sweep orphans until a batch comes back smaller
/// than [`GC_BATCH_SIZE`] (i.e. nothing more is expired).
async fn run_class_cycle(
    pool: &SqlitePool,
    write_lock: &WriteLock,
    cache: &tokio::sync::Mutex<DedupCache>,
    class: BufferClass,
    retention_days: u32,
    now_ms: i64,
) -> Result<u64, sqlx::Error> {
    if retention_days == 0 {
        return Ok(0);
    }

    let cutoff_ms = now_ms - i64::from(retention_days) * 86_400_000;
    let mut total_deleted = 0u64;

    loop {
        let (row_count, ids) = delete_one_batch(pool, write_lock, class, cutoff_ms).await?;
        total_deleted += row_count;

        if !ids.is_empty() {
            if let Err(e) = orphan_sweep(pool, write_lock, cache, &ids).await {
                tracing::warn!(error = %e, "orphan sweep failed, will retry next cycle");
            }
            tokio::task::yield_now().await;
        }

        if row_count < GC_BATCH_SIZE as u64 {
            break;
        }
    }

    Ok(total_deleted)
}

/// Run one retention cycle across both buffer classes. Overlapping
/// invocations are rejected by `guard`; the caller is expected to check
/// `RetentionGuard::try_enter` before calling this.
pub async fn run_cycle(
    pool: &SqlitePool,
    write_lock: &WriteLock,
    cache: &tokio::sync::Mutex<DedupCache>,
    retention_days_channel: u32,
    retention_days_pm: u32,
    now_ms: i64,
) {
    let started = Instant::now();
    metrics::counter!(metric_names::RETENTION_RUNS).increment(1);

    let channel_result =
        run_class_cycle(pool, write_lock, cache, BufferClass::Channel, retention_days_channel, now_ms)
            .await;
    let pm_result =
        run_class_cycle(pool, write_lock, cache, BufferClass::Pm, retention_days_pm, now_ms).await;

    let mut rows_deleted = 0u64;
    for result in [channel_result, pm_result] {
        match result {
            Ok(deleted) => rows_deleted += deleted,
            Err(e) => {
                tracing::error!(error = %e, "retention cycle aborted");
                metrics::counter!(metric_names::RETENTION_ERRORS).increment(1);
            }
        }
    }

    metrics::gauge!(metric_names::RETENTION_ROWS_DELETED).set(rows_deleted as f64);
    metrics::gauge!(metric_names::RETENTION_DURATION_MS)
        .set(started.elapsed().as_millis() as f64);

    tracing::info!(rows_deleted, duration_ms = started.elapsed().as_millis() as u64, "retention cycle complete");
}
