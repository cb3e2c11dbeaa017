//! Downloading thumbnails from the origin.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

use crate::types::VideoId;

mod http;

pub use self::http::{HttpFetcher, ThumbnailVariant};

/// The user agent sent with every origin request.
pub const USER_AGENT: &str = concat!("thumbnailer/", env!("CARGO_PKG_VERSION"));

/// An error that happens when downloading a thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The origin has no thumbnail for this video.
    #[error("not found")]
    NotFound,
    /// The download did not finish before the request deadline.
    #[error("download timed out")]
    Timeout,
    /// Any other problem, like connection loss, DNS resolution, or a 5xx response.
    ///
    /// The attached string describes the underlying failure.
    #[error("download failed: {0}")]
    Internal(String),
}

impl FetchError {
    fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::Internal(error_string)
    }

    /// A short name for metrics tags.
    pub fn as_tag(&self) -> &'static str {
        match self {
            FetchError::NotFound => "notfound",
            FetchError::Timeout => "timeout",
            FetchError::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::download_error(&error)
        }
    }
}

/// Downloads thumbnails for a [`VideoId`].
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Downloads the thumbnail of `video_id`, giving up at `deadline`.
    async fn fetch(&self, video_id: &VideoId, deadline: Instant) -> Result<Bytes, FetchError>;
}
