use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical identifier of a video.
///
/// A `VideoId` is exactly [`VideoId::LEN`] characters long and only contains ASCII letters,
/// digits, `-` and `_`. It is the key under which thumbnails are cached and downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// The length of every valid video id.
    pub const LEN: usize = 11;

    /// Creates a `VideoId` if `s` has the canonical shape.
    pub fn parse(s: &str) -> Option<Self> {
        Self::is_valid(s).then(|| Self(s.to_owned()))
    }

    fn is_valid(s: &str) -> bool {
        s.len() == Self::LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VideoId {
    type Error = crate::extract::InvalidVideoId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(crate::extract::InvalidVideoId)
        }
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

/// A thumbnail as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The raw image bytes.
    pub data: Bytes,
    /// When the thumbnail was written to the cache.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether this entry may still be served, given the cache `ttl`.
    ///
    /// An entry exactly `ttl` old is still fresh. Entries with a timestamp in the future
    /// (clock skew) are treated as fresh as well.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        match (now - self.stored_at).to_std() {
            Ok(age) => age <= ttl,
            Err(_) => true,
        }
    }
}

/// Where a returned thumbnail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSource {
    Cache,
    Origin,
}

impl ThumbnailSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSource::Cache => "cache",
            ThumbnailSource::Origin => "origin",
        }
    }
}

/// A successfully resolved thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub video_id: VideoId,
    pub data: Bytes,
    pub source: ThumbnailSource,
}
