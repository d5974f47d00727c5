//! The dedup pool (C1) and its in-memory accelerator (C2).

use chatstore_core::{PayloadId, StoreError};
use indexmap::IndexMap;
use sqlx::{Row, SqliteConnection};

/// Bounded, least-recently-used cache of `payload bytes -> id`.
///
/// Sized by summed key-byte-length against `budget_bytes`, not entry
/// count — tag bundles and multiline payloads vary wildly in size.
#[derive(Debug)]
pub struct DedupCache {
    entries: IndexMap<Vec<u8>, PayloadId>,
    current_bytes: usize,
    budget_bytes: usize,
}

impl DedupCache {
    /// Create an empty cache with the given byte budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            current_bytes: 0,
            budget_bytes,
        }
    }

    /// Look up `bytes`, marking the entry as most-recently-used on hit.
    pub fn get(&mut self, bytes: &[u8]) -> Option<PayloadId> {
        let id = self.entries.shift_remove(bytes)?;
        self.entries.insert(bytes.to_vec(), id);
        Some(id)
    }

    /// Insert `bytes -> id`, evicting least-recently-used entries until
    /// the byte budget is satisfied.
    pub fn insert(&mut self, bytes: Vec<u8>, id: PayloadId) {
        if let Some(old_id) = self.entries.shift_remove(&bytes) {
            debug_assert_eq!(old_id, id, "interned bytes must always map to a stable id");
            self.current_bytes -= bytes.len();
        }

        while self.current_bytes + bytes.len() > self.budget_bytes && !self.entries.is_empty() {
            if let Some((evicted_key, _)) = self.entries.shift_remove_index(0) {
                self.current_bytes -= evicted_key.len();
            }
        }

        self.current_bytes += bytes.len();
        self.entries.insert(bytes, id);
    }

    /// Drop every entry. Called on shutdown and whenever the orphan
    /// sweeper deletes a non-zero number of payloads: a cached id could
    /// otherwise point to a row the sweep just removed.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }

    /// Merge ids interned by a transaction that has just committed. Must
    /// never be called for a transaction that rolled back — see
    /// [`PendingInterns`].
    pub fn apply_pending(&mut self, pending: PendingInterns) {
        for (bytes, id) in pending {
            self.insert(bytes, id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Ids minted by `intern` calls within a single still-open transaction.
///
/// These must not be merged into the shared cache until the transaction
/// commits: if it rolls back instead, the rows backing them never
/// existed, and a cache hit on them would hand out a dangling payload id
/// to the next caller. [`DedupCache::apply_pending`] performs the merge;
/// simply dropping a `PendingInterns` on a rollback path discards them.
pub type PendingInterns = Vec<(Vec<u8>, PayloadId)>;

/// Assign or retrieve a stable id for `bytes`, within the caller's open
/// write transaction.
///
/// Idempotent: repeated calls with equal bytes return the same id for
/// the lifetime of the underlying row. A duplicate-insert rejection is a
/// signalling no-op, not an error — the row already exists and its id is
/// simply read back.
///
/// Newly-minted ids are recorded in `pending` rather than written
/// straight into `cache`, since the row they point at only becomes
/// durable if the caller's transaction later commits (see
/// [`PendingInterns`]). A hit against `cache` or an already-pending entry
/// from earlier in the same transaction is returned directly.
pub async fn intern(
    conn: &mut SqliteConnection,
    cache: &mut DedupCache,
    pending: &mut PendingInterns,
    bytes: &[u8],
) -> Result<PayloadId, StoreError> {
    if let Some(id) = cache.get(bytes) {
        return Ok(id);
    }

    if let Some((_, id)) = pending.iter().find(|(b, _)| b == bytes) {
        return Ok(*id);
    }

    sqlx::query("INSERT OR IGNORE INTO payloads (bytes) VALUES (?1)")
        .bind(bytes)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Engine(e.to_string()))?;

    let row = sqlx::query("SELECT id FROM payloads WHERE bytes = ?1")
        .bind(bytes)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StoreError::Engine(e.to_string()))?;

    let id = PayloadId(row.get::<i64, _>("id"));
    pending.push((bytes.to_vec(), id));
    Ok(id)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn cache_hit_moves_entry_to_back() {
        let mut cache = DedupCache::new(1024);
        cache.insert(b"a".to_vec(), PayloadId(1));
        cache.insert(b"b".to_vec(), PayloadId(2));
        assert_eq!(cache.get(b"a"), Some(PayloadId(1)));
        // "a" should now be most-recently-used; evicting should drop "b" first.
        cache.insert(vec![0u8; 1022], PayloadId(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(b"b"), None);
        assert_eq!(cache.get(b"a"), Some(PayloadId(1)));
    }

    #[test]
    fn budget_eviction_keeps_cache_under_budget() {
        let mut cache = DedupCache::new(16);
        for i in 0..10u8 {
            cache.insert(vec![i; 4], PayloadId(i as i64));
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = DedupCache::new(1024);
        cache.insert(b"a".to_vec(), PayloadId(1));
        cache.clear();
        assert_eq!(cache.get(b"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reinserting_same_bytes_does_not_double_count_budget() {
        let mut cache = DedupCache::new(8);
        cache.insert(b"abcd".to_vec(), PayloadId(1));
        cache.insert(b"abcd".to_vec(), PayloadId(1));
        assert_eq!(cache.len(), 1);
    }

    async fn open_payloads_db() -> SqliteConnection {
        use sqlx::ConnectOptions;
        let mut conn = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(":memory:")
            .connect()
            .await
            .unwrap();
        sqlx::query("CREATE TABLE payloads (id INTEGER PRIMARY KEY AUTOINCREMENT, bytes BLOB NOT NULL UNIQUE)")
            .execute(&mut conn)
            .await
            .unwrap();
        conn
    }

    #[tokio::test]
    async fn discarded_pending_interns_do_not_poison_the_cache() {
        let mut conn = open_payloads_db().await;
        let mut cache = DedupCache::new(4096);

        // Simulate a transaction that interns `bytes`, then rolls back:
        // the caller never calls `apply_pending`, so the id never reaches
        // the cache even though it was minted (and, in a real rollback,
        // the row backing it stopped existing too).
        let mut pending = Vec::new();
        let rolled_back_id = intern(&mut conn, &mut cache, &mut pending, b"hello").await.unwrap();
        drop(pending);
        assert_eq!(cache.get(b"hello"), None);

        // A later transaction interning the same bytes must not get a
        // stale cache hit; it re-runs the insert-or-ignore/read-back path
        // and gets a real, current id, then commits it into the cache.
        let mut pending = Vec::new();
        let committed_id = intern(&mut conn, &mut cache, &mut pending, b"hello").await.unwrap();
        cache.apply_pending(pending);

        assert_eq!(committed_id, rolled_back_id, "same row, same id, just fetched fresh");
        assert_eq!(cache.get(b"hello"), Some(committed_id));
    }

    proptest! {
        /// Interning equal byte strings always yields the same id, whether
        /// served from the cache or recovered via `INSERT OR IGNORE` plus
        /// read-back.
        #[test]
        fn intern_is_idempotent_for_equal_bytes(payload in proptest::collection::vec(any::<u8>(), 0..64), repeats in 2usize..6) {
            let result: TestCaseResult = tokio_test::block_on(async {
                let mut conn = open_payloads_db().await;
                let mut cache = DedupCache::new(4096);

                let mut pending = Vec::new();
                let first = intern(&mut conn, &mut cache, &mut pending, &payload).await.unwrap();
                cache.apply_pending(pending);

                for _ in 1..repeats {
                    let mut pending = Vec::new();
                    let again = intern(&mut conn, &mut cache, &mut pending, &payload).await.unwrap();
                    cache.apply_pending(pending);
                    prop_assert_eq!(again, first);
                }
                Ok(())
            });
            result?;
        }
    }
}
