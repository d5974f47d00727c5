//! The ingest serializer (C4): a FIFO queue drained by a single worker
//! task, each dequeued message persisted inside one write transaction.

use std::time::Instant;

use chatstore_core::{metrics as metric_names, ClientContext, Clock, InboundMessage, UpstreamContext};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};

use crate::dedup::{intern, DedupCache, PendingInterns};
use crate::writer_lock::WriteLock;

/// One message accepted into the ingest queue.
pub struct IngestJob {
    pub message: InboundMessage,
    pub upstream: UpstreamContext,
    pub client: ClientContext,
}

/// Persist one qualifying, derived event inside a single write
/// transaction: intern the five payload slots, then insert the event
/// row. A duplicate-payload insert is a signalling no-op, not an error,
/// so the whole operation either fully succeeds or is logged and
/// dropped — ingest never surfaces an error to its caller.
async fn persist_one(
    pool: &SqlitePool,
    write_lock: &WriteLock,
    cache: &Mutex<DedupCache>,
    job: IngestJob,
    clock: &dyn Clock,
) {
    let derived = match chatstore_core::derive_event(&job.message, &job.upstream, &job.client, clock.now_ms()) {
        Some(d) => d,
        None => return,
    };

    let _guard = write_lock.acquire().await;

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, "failed to open ingest transaction");
            return;
        }
    };

    // Ids minted by `intern` below are only staged here, not written into
    // `cache`, until the transaction actually commits: a rollback means
    // the rows backing them never existed, and caching them anyway would
    // hand out dangling payload ids to the next `store()` call that
    // happens to intern the same bytes.
    let mut pending: PendingInterns = Vec::new();

    let result = async {
        let mut cache = cache.lock().await;
        let buffer_ref = intern(&mut tx, &mut cache, &mut pending, derived.buffer_name.as_bytes()).await?;
        let tags_ref = intern(&mut tx, &mut cache, &mut pending, derived.tags.as_bytes()).await?;
        let data_ref = intern(&mut tx, &mut cache, &mut pending, derived.data.as_bytes()).await?;
        let prefix_ref = intern(&mut tx, &mut cache, &mut pending, derived.prefix.as_bytes()).await?;
        let params_ref = intern(&mut tx, &mut cache, &mut pending, derived.params.as_bytes()).await?;
        // `intern` takes `&mut SqliteConnection`; `Transaction` derefs to
        // it, and passing `&mut tx` relies on that deref coercion at
        // each call site above.
        drop(cache);

        sqlx::query(
            "INSERT INTO events \
             (user_id, network_id, buffer_ref, time, kind, msgid, tags_ref, data_ref, prefix_ref, params_ref) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(job.client.user_id.0 as i64)
        .bind(job.upstream.network_id.0 as i64)
        .bind(buffer_ref.0)
        .bind(derived.time)
        .bind(derived.kind.as_i64())
        .bind(&derived.msgid)
        .bind(tags_ref.0)
        .bind(data_ref.0)
        .bind(prefix_ref.0)
        .bind(params_ref.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| chatstore_core::StoreError::Engine(e.to_string()))
    }
    .await;

    match result {
        Ok(_) => match tx.commit().await {
            Ok(()) => cache.lock().await.apply_pending(pending),
            Err(e) => tracing::error!(error = %e, "failed to commit ingest transaction"),
        },
        Err(e) => {
            tracing::error!(error = %e, "ingest transaction failed, rolling back");
            let _ = tx.rollback().await;
        }
    }
}

/// Spawn the single worker that drains the ingest queue, yielding to the
/// runtime between events so other work can interleave.
pub fn spawn_worker(
    pool: SqlitePool,
    write_lock: std::sync::Arc<WriteLock>,
    cache: std::sync::Arc<Mutex<DedupCache>>,
    clock: std::sync::Arc<dyn Clock>,
    mut rx: mpsc::UnboundedReceiver<IngestJob>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let started = Instant::now();
            persist_one(&pool, &write_lock, &cache, job, clock.as_ref()).await;
            metrics::histogram!(metric_names::STORE_TIME).record(started.elapsed().as_secs_f64());
            tokio::task::yield_now().await;
        }
    })
}
