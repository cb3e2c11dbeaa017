//! Turning user supplied video references into [`VideoId`]s.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::VideoId;

/// Matches the video id in the common URL shapes:
/// `watch?v=`, `watch?...&v=`, `/v/`, `/vi/`, `/embed/`, `/e/`, `youtu.be/` and the
/// `youtube-nocookie.com` variants of those.
static VIDEO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube(?:-nocookie)?\.com/(?:[^/\n\s]+/\S+/|(?:v|e(?:mbed)?)/|\S*?[?&]vi?=)|youtu\.be/)([a-zA-Z0-9_-]{11})",
    )
    .unwrap()
});

/// The reference does not contain a recognizable video id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid video url")]
pub struct InvalidVideoId;

/// Resolves a raw reference into a canonical [`VideoId`].
///
/// Implementations must be pure: no I/O, no shared state.
pub trait Extractor: Send + Sync + fmt::Debug {
    fn extract(&self, reference: &str) -> Result<VideoId, InvalidVideoId>;
}

/// An [`Extractor`] that recognizes video URLs and bare video ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexExtractor;

impl Extractor for RegexExtractor {
    fn extract(&self, reference: &str) -> Result<VideoId, InvalidVideoId> {
        if let Some(id) = VIDEO_URL_RE
            .captures(reference)
            .and_then(|captures| captures.get(1))
            .and_then(|m| VideoId::parse(m.as_str()))
        {
            return Ok(id);
        }

        // plain video id
        VideoId::parse(reference).ok_or(InvalidVideoId)
    }
}
