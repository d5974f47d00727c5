//! The five range-query forms (C5).

use chatstore_core::{EventKind, HistoryCursor, StoredMessage};
use sqlx::{Row, SqlitePool};

fn bytes_to_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes.clone()).unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned())
}

/// Resolve a buffer name to its payload id. `None` means no event could
/// possibly reference this buffer (it was never interned), so the
/// caller can short-circuit to an empty result.
async fn resolve_buffer_ref(pool: &SqlitePool, buffer: &str) -> Option<i64> {
    sqlx::query("SELECT id FROM payloads WHERE bytes = ?1")
        .bind(buffer.as_bytes())
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .map(|row| row.get::<i64, _>("id"))
}

/// Resolve the time of the first event carrying `msgid`. `None` means
/// the msgid is unknown, and the caller must therefore return an empty
/// result (the distilled spec treats an unresolved msgid comparison as
/// false for every row, not as an error).
async fn resolve_msgid_time(pool: &SqlitePool, msgid: &str) -> Option<i64> {
    sqlx::query("SELECT time FROM events WHERE msgid = ?1 ORDER BY rowid ASC LIMIT 1")
        .bind(msgid)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .map(|row| row.get::<i64, _>("time"))
}

async fn resolve_cursor_time(pool: &SqlitePool, cursor: &HistoryCursor) -> Option<i64> {
    match cursor {
        HistoryCursor::Timestamp(t) => Some(*t),
        HistoryCursor::Msgid(m) => resolve_msgid_time(pool, m).await,
    }
}

const SELECT_COLUMNS: &str = "e.user_id, e.network_id, e.time, e.kind, e.msgid, \
    ptags.bytes AS tags_bytes, pdata.bytes AS data_bytes, \
    pprefix.bytes AS prefix_bytes, pparams.bytes AS params_bytes";

const JOINS: &str = "FROM events e \
    JOIN payloads ptags ON ptags.id = e.tags_ref \
    JOIN payloads pdata ON pdata.id = e.data_ref \
    JOIN payloads pprefix ON pprefix.id = e.prefix_ref \
    JOIN payloads pparams ON pparams.id = e.params_ref";

fn row_to_message(row: &sqlx::sqlite::SqliteRow, buffer: &str) -> StoredMessage {
    use chatstore_core::{NetworkId, UserId};

    let kind = EventKind::from_i64(row.get::<i64, _>("kind")).unwrap_or(EventKind::Privmsg);
    StoredMessage {
        user_id: UserId(row.get::<i64, _>("user_id") as u64),
        network_id: NetworkId(row.get::<i64, _>("network_id") as u64),
        buffer: buffer.to_string(),
        time: row.get::<i64, _>("time"),
        kind,
        msgid: row.get::<String, _>("msgid"),
        tags: bytes_to_string(row.get::<Vec<u8>, _>("tags_bytes")),
        params: bytes_to_string(row.get::<Vec<u8>, _>("params_bytes")),
        data: bytes_to_string(row.get::<Vec<u8>, _>("data_bytes")),
        prefix: bytes_to_string(row.get::<Vec<u8>, _>("prefix_bytes")),
    }
}

/// `time(e) > time-of(msgid)`, ascending. Empty if `msgid` is unknown.
pub async fn from_msgid(
    pool: &SqlitePool,
    user_id: u64,
    network_id: u64,
    buffer: &str,
    msgid: &str,
    limit: u32,
) -> Vec<StoredMessage> {
    let Some(time) = resolve_msgid_time(pool, msgid).await else {
        return Vec::new();
    };
    from_time(pool, user_id, network_id, buffer, time, limit).await
}

/// `time(e) > time`, ascending.
pub async fn from_time(
    pool: &SqlitePool,
    user_id: u64,
    network_id: u64,
    buffer: &str,
    time: i64,
    limit: u32,
) -> Vec<StoredMessage> {
    let Some(buffer_ref) = resolve_buffer_ref(pool, buffer).await else {
        return Vec::new();
    };

    let sql = format!(
        "SELECT {SELECT_COLUMNS} {JOINS} \
         WHERE e.user_id = ?1 AND e.network_id = ?2 AND e.buffer_ref = ?3 AND e.time > ?4 \
         ORDER BY e.time ASC, e.rowid ASC LIMIT ?5"
    );

    sqlx::query(&sql)
        .bind(user_id as i64)
        .bind(network_id as i64)
        .bind(buffer_ref)
        .bind(time)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .map(|rows| rows.iter().map(|r| row_to_message(r, buffer)).collect())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "from_time query failed");
            Vec::new()
        })
}

/// `time(e) <= time-of(msgid)`, ascending. Empty if `msgid` is unknown.
pub async fn before_msgid(
    pool: &SqlitePool,
    user_id: u64,
    network_id: u64,
    buffer: &str,
    msgid: &str,
    limit: u32,
) -> Vec<StoredMessage> {
    let Some(time) = resolve_msgid_time(pool, msgid).await else {
        return Vec::new();
    };
    before_time(pool, user_id, network_id, buffer, time, limit).await
}

/// `time(e) <= time`, ascending (queried descending, then reversed).
pub async fn before_time(
    pool: &SqlitePool,
    user_id: u64,
    network_id: u64,
    buffer: &str,
    time: i64,
    limit: u32,
) -> Vec<StoredMessage> {
    let Some(buffer_ref) = resolve_buffer_ref(pool, buffer).await else {
        return Vec::new();
    };

    let sql = format!(
        "SELECT {SELECT_COLUMNS} {JOINS} \
         WHERE e.user_id = ?1 AND e.network_id = ?2 AND e.buffer_ref = ?3 AND e.time <= ?4 \
         ORDER BY e.time DESC, e.rowid DESC LIMIT ?5"
    );

    let mut rows = sqlx::query(&sql)
        .bind(user_id as i64)
        .bind(network_id as i64)
        .bind(buffer_ref)
        .bind(time)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .map(|rows| rows.iter().map(|r| row_to_message(r, buffer)).collect::<Vec<_>>())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "before_time query failed");
            Vec::new()
        });

    rows.reverse();
    rows
}

/// `[from, to)` — `from` inclusive, `to` exclusive — both optional,
/// ascending. Omitting both returns the most recent `limit` messages.
pub async fn between(
    pool: &SqlitePool,
    user_id: u64,
    network_id: u64,
    buffer: &str,
    from: Option<HistoryCursor>,
    to: Option<HistoryCursor>,
    limit: u32,
) -> Vec<StoredMessage> {
    let Some(buffer_ref) = resolve_buffer_ref(pool, buffer).await else {
        return Vec::new();
    };

    let lower = match from {
        Some(cursor) => match resolve_cursor_time(pool, &cursor).await {
            Some(t) => t,
            None => return Vec::new(),
        },
        None => 0,
    };
    let upper = match to {
        Some(cursor) => match resolve_cursor_time(pool, &cursor).await {
            Some(t) => t,
            None => return Vec::new(),
        },
        None => i64::MAX,
    };

    let sql = format!(
        "SELECT {SELECT_COLUMNS} {JOINS} \
         WHERE e.user_id = ?1 AND e.network_id = ?2 AND e.buffer_ref = ?3 \
           AND e.time >= ?4 AND e.time < ?5 \
         ORDER BY e.time DESC, e.rowid DESC LIMIT ?6"
    );

    let mut rows = sqlx::query(&sql)
        .bind(user_id as i64)
        .bind(network_id as i64)
        .bind(buffer_ref)
        .bind(lower)
        .bind(upper)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .map(|rows| rows.iter().map(|r| row_to_message(r, buffer)).collect::<Vec<_>>())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "between query failed");
            Vec::new()
        });

    rows.reverse();
    rows
}
