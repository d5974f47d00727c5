//! The SQLite-backed `MessageStore` implementation: schema, PRAGMAs,
//! lifecycle, and the glue between C1–C7.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatstore_core::{
    metrics as metric_names, system_clock, ClientContext, Clock, Config, HistoryCursor,
    InboundMessage, MessageStore, Result, StoreError, StoredMessage, UpstreamContext,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::dedup::DedupCache;
use crate::ingest::{spawn_worker, IngestJob};
use crate::query;
use crate::retention::{self, RetentionGuard};
use crate::writer_lock::WriteLock;

/// A persistent chat history store backed by a single SQLite database
/// file, implementing dedup (C1/C2), the event log (C3), a serialized
/// ingest pipeline (C4), range queries (C5), and retention GC with
/// orphan sweeping (C6/C7).
pub struct ChatStore {
    pool: SqlitePool,
    write_lock: Arc<WriteLock>,
    cache: Arc<Mutex<DedupCache>>,
    ingest_tx: mpsc::UnboundedSender<IngestJob>,
    ingest_handle: Mutex<Option<JoinHandle<()>>>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
    gc_stop: Arc<AtomicBool>,
    gc_notify: Arc<Notify>,
    config: Config,
}

impl ChatStore {
    /// Open (or create) the database, apply PRAGMAs, create the schema,
    /// and start the ingest worker and retention timer. Database-open
    /// failure is the one fatal error this crate propagates to its
    /// caller.
    pub async fn init(config: Config) -> Result<Self> {
        Self::init_with_clock(config, system_clock()).await
    }

    /// Like [`init`](Self::init), but with an injectable clock — used by
    /// tests that need deterministic timestamps.
    pub async fn init_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let connect_options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("cache_size", format!("-{}", config.cache_size_kb))
            .pragma("temp_store", "MEMORY")
            .pragma("mmap_size", config.mmap_size_bytes.to_string());

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Engine(e.to_string()))?;

        migrate(&pool).await?;

        let write_lock = Arc::new(WriteLock::new());
        let cache = Arc::new(Mutex::new(DedupCache::new(config.cache_size_kb as usize * 1024)));

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let ingest_handle = spawn_worker(
            pool.clone(),
            write_lock.clone(),
            cache.clone(),
            clock.clone(),
            ingest_rx,
        );

        let gc_stop = Arc::new(AtomicBool::new(false));
        let gc_notify = Arc::new(Notify::new());
        let gc_handle = spawn_retention_loop(
            pool.clone(),
            write_lock.clone(),
            cache.clone(),
            config.clone(),
            clock,
            gc_stop.clone(),
            gc_notify.clone(),
        );

        Ok(Self {
            pool,
            write_lock,
            cache,
            ingest_tx,
            ingest_handle: Mutex::new(Some(ingest_handle)),
            gc_handle: Mutex::new(Some(gc_handle)),
            gc_stop,
            gc_notify,
            config,
        })
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payloads ( \
            id INTEGER PRIMARY KEY AUTOINCREMENT, \
            bytes BLOB NOT NULL UNIQUE \
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Engine(e.to_string()))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events ( \
            user_id INTEGER NOT NULL, \
            network_id INTEGER NOT NULL, \
            buffer_ref INTEGER NOT NULL, \
            time INTEGER NOT NULL, \
            kind INTEGER NOT NULL, \
            msgid TEXT NOT NULL DEFAULT '', \
            tags_ref INTEGER NOT NULL, \
            data_ref INTEGER NOT NULL, \
            prefix_ref INTEGER NOT NULL, \
            params_ref INTEGER NOT NULL \
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Engine(e.to_string()))?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_events_user_buffer_time ON events(user_id, buffer_ref, time)",
        "CREATE INDEX IF NOT EXISTS idx_events_msgid ON events(msgid)",
        "CREATE INDEX IF NOT EXISTS idx_events_buffer_ref ON events(buffer_ref)",
        "CREATE INDEX IF NOT EXISTS idx_events_tags_ref ON events(tags_ref)",
        "CREATE INDEX IF NOT EXISTS idx_events_data_ref ON events(data_ref)",
        "CREATE INDEX IF NOT EXISTS idx_events_prefix_ref ON events(prefix_ref)",
        "CREATE INDEX IF NOT EXISTS idx_events_params_ref ON events(params_ref)",
    ] {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Engine(e.to_string()))?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_retention_loop(
    pool: SqlitePool,
    write_lock: Arc<WriteLock>,
    cache: Arc<Mutex<DedupCache>>,
    config: Config,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let guard = RetentionGuard::new();
        let period = Duration::from_secs(u64::from(config.retention_cleanup_interval) * 60);
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; this is the "runs at startup
        // once" requirement.
        interval.tick().await;

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            if guard.try_enter() {
                retention::run_cycle(
                    &pool,
                    &write_lock,
                    &cache,
                    config.retention_days_channel,
                    config.retention_days_pm,
                    clock.now_ms(),
                )
                .await;
                guard.leave();
            } else {
                tracing::warn!("retention tick skipped: previous cycle still running");
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = notify.notified() => {}
            }
        }
    })
}

#[async_trait]
impl MessageStore for ChatStore {
    async fn store(&self, message: InboundMessage, upstream: UpstreamContext, client: ClientContext) {
        if self
            .ingest_tx
            .send(IngestJob { message, upstream, client })
            .is_err()
        {
            tracing::error!("ingest queue closed, dropping message");
        }
    }

    async fn query_from_msgid(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        msgid: &str,
        limit: u32,
    ) -> Vec<StoredMessage> {
        let started = Instant::now();
        let result = query::from_msgid(&self.pool, client.user_id.0, upstream.network_id.0, buffer, msgid, limit).await;
        record_lookup_time(started);
        result
    }

    async fn query_from_time(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        time: i64,
        limit: u32,
    ) -> Vec<StoredMessage> {
        let started = Instant::now();
        let result = query::from_time(&self.pool, client.user_id.0, upstream.network_id.0, buffer, time, limit).await;
        record_lookup_time(started);
        result
    }

    async fn query_before_msgid(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        msgid: &str,
        limit: u32,
    ) -> Vec<StoredMessage> {
        let started = Instant::now();
        let result = query::before_msgid(&self.pool, client.user_id.0, upstream.network_id.0, buffer, msgid, limit).await;
        record_lookup_time(started);
        result
    }

    async fn query_before_time(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        time: i64,
        limit: u32,
    ) -> Vec<StoredMessage> {
        let started = Instant::now();
        let result = query::before_time(&self.pool, client.user_id.0, upstream.network_id.0, buffer, time, limit).await;
        record_lookup_time(started);
        result
    }

    async fn query_between(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        from: Option<HistoryCursor>,
        to: Option<HistoryCursor>,
        limit: u32,
    ) -> Vec<StoredMessage> {
        let started = Instant::now();
        let result =
            query::between(&self.pool, client.user_id.0, upstream.network_id.0, buffer, from, to, limit).await;
        record_lookup_time(started);
        result
    }

    async fn shutdown(self) -> Result<()> {
        let ChatStore {
            pool,
            ingest_tx,
            ingest_handle,
            gc_handle,
            gc_stop,
            gc_notify,
            ..
        } = self;

        drop(ingest_tx);
        if let Some(handle) = ingest_handle.into_inner() {
            let _ = handle.await;
        }

        gc_stop.store(true, Ordering::Relaxed);
        gc_notify.notify_one();
        if let Some(handle) = gc_handle.into_inner() {
            let _ = handle.await;
        }

        pool.close().await;
        Ok(())
    }
}

impl ChatStore {
    /// The configuration this store was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn record_lookup_time(started: Instant) {
    metrics::histogram!(metric_names::LOOKUP_TIME).record(started.elapsed().as_secs_f64());
}
