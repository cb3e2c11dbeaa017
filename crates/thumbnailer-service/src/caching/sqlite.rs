use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{CacheEntry, VideoId};

use super::{CacheStore, StoreError};

const SQL_INIT: &str = "
CREATE TABLE IF NOT EXISTS thumbnail (
    id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    video_id TEXT NOT NULL,
    data BLOB NOT NULL,
    ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS thumbnail_video_id_idx ON thumbnail(video_id, ts);
";

const SQL_INSERT: &str = "INSERT INTO thumbnail (video_id, data, ts) VALUES (?1, ?2, ?3)";

// Rows are never updated in place. The newest timestamp wins, and for rows written within
// the same second the last insert wins.
const SQL_SELECT: &str = "
SELECT data, ts FROM thumbnail
WHERE video_id = ?1
ORDER BY ts DESC, id DESC
LIMIT 1
";

const SQL_PURGE: &str = "DELETE FROM thumbnail WHERE ts < ?1";

/// A [`CacheStore`] backed by a sqlite database.
///
/// All database access happens on the blocking thread pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`.
    ///
    /// The path `:memory:` creates a private in-memory database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        tracing::debug!("Opening thumbnail cache at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Creates a store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::trace!(journal_mode = %mode, "Initialized thumbnail cache");
        conn.execute_batch(SQL_INIT)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection on the blocking thread pool.
    async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // sqlite rolls back the implicit transaction of a statement that panicked
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, video_id: &VideoId) -> Result<Option<CacheEntry>, StoreError> {
        let video_id = video_id.clone();
        self.with_connection(move |conn| {
            let row = conn
                .prepare_cached(SQL_SELECT)?
                .query_row(params![video_id.as_str()], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
                })
                .optional()?;

            let Some((data, ts)) = row else {
                return Ok(None);
            };
            let stored_at = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ts} out of range")))?;

            Ok(Some(CacheEntry {
                data: Bytes::from(data),
                stored_at,
            }))
        })
        .await
    }

    async fn set(
        &self,
        video_id: &VideoId,
        data: Bytes,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let video_id = video_id.clone();
        self.with_connection(move |conn| {
            conn.prepare_cached(SQL_INSERT)?.execute(params![
                video_id.as_str(),
                &data[..],
                stored_at.timestamp()
            ])?;
            Ok(())
        })
        .await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.with_connection(move |conn| {
            let removed = conn
                .prepare_cached(SQL_PURGE)?
                .execute(params![cutoff.timestamp()])?;
            Ok(removed as u64)
        })
        .await
    }
}
