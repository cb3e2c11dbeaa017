//! Persistent storage of downloaded thumbnails.
//!
//! The store is append-only: every write inserts a new row, and reads return the most recent
//! row for a [`VideoId`]. Freshness is not the store's concern; entries are returned with their
//! `stored_at` timestamp and the caller decides whether they are still usable.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{CacheEntry, VideoId};

mod cleanup;
mod sqlite;

pub use cleanup::{cleanup, purge_expired, spawn_cleanup};
pub use sqlite::SqliteStore;

/// An error of the backing store itself.
///
/// Absence of an entry is never an error. Any `StoreError` means the persistence layer cannot
/// be trusted anymore.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected an operation.
    #[error("database error")]
    Database(#[from] rusqlite::Error),
    /// The blocking task running the operation panicked or was cancelled.
    #[error("store task failed")]
    Task(#[from] tokio::task::JoinError),
    /// A row could not be turned into a [`CacheEntry`].
    #[error("corrupt cache row: {0}")]
    Corrupt(String),
    /// Any other failure of the backend.
    #[error("store failure: {0}")]
    Backend(String),
}

/// A shared, internally synchronized thumbnail store.
///
/// Implementations must be safe to use from many concurrent requests without external locking.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Returns the most recently stored entry for `video_id`, or `None` if there is none.
    async fn get(&self, video_id: &VideoId) -> Result<Option<CacheEntry>, StoreError>;

    /// Appends a new entry for `video_id`.
    async fn set(
        &self,
        video_id: &VideoId,
        data: Bytes,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Deletes every entry stored before `cutoff`, returning how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
