//! Support to download thumbnails from the HTTP origin.

use std::time::Instant as StdInstant;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};
use tokio::time::Instant;

use crate::config::OriginConfig;
use crate::types::VideoId;

use super::{FetchError, Fetcher, USER_AGENT};

/// The resolutions the origin offers, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailVariant {
    /// 1280x720, missing for many older videos.
    MaxRes,
    /// 480x360, available for every video.
    Hq,
}

impl ThumbnailVariant {
    pub fn file_name(&self) -> &'static str {
        match self {
            ThumbnailVariant::MaxRes => "maxresdefault.jpg",
            ThumbnailVariant::Hq => "hqdefault.jpg",
        }
    }

    fn as_tag(&self) -> &'static str {
        match self {
            ThumbnailVariant::MaxRes => "maxres",
            ThumbnailVariant::Hq => "hq",
        }
    }
}

/// A [`Fetcher`] that downloads from the HTTP origin.
///
/// The highest resolution is tried first. If that fails for any reason the lower resolution
/// is downloaded instead, and its outcome is what gets reported.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn from_config(config: &OriginConfig) -> reqwest::Result<Self> {
        let client = crate::utils::http::create_client(config.connect_timeout)?;
        Ok(Self::new(client, config.url.clone()))
    }

    /// The URL at which the origin serves `variant` of the thumbnail of `video_id`.
    pub fn url(&self, video_id: &VideoId, variant: ThumbnailVariant) -> Result<Url, FetchError> {
        self.base_url
            .join(&format!("vi/{video_id}/{}", variant.file_name()))
            .map_err(|err| FetchError::Internal(err.to_string()))
    }

    async fn download_variant(
        &self,
        video_id: &VideoId,
        variant: ThumbnailVariant,
        deadline: Instant,
    ) -> Result<Bytes, FetchError> {
        let url = self.url(video_id, variant)?;
        tracing::debug!("Fetching thumbnail from `{}`", url);

        let start = StdInstant::now();
        let request = async {
            let response = self
                .client
                .get(url)
                .header(header::USER_AGENT, USER_AGENT)
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => Ok(response.bytes().await?),
                StatusCode::NOT_FOUND => Err(FetchError::NotFound),
                status => Err(FetchError::Internal(format!("unexpected status {status}"))),
            }
        };

        let result = match tokio::time::timeout_at(deadline, request).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FetchError::Timeout),
        };

        let status = match &result {
            Ok(_) => "success",
            Err(err) => err.as_tag(),
        };
        metric!(
            timer("origin.download.duration") = start.elapsed(),
            "variant" => variant.as_tag(),
            "status" => status,
        );
        if let Ok(data) = &result {
            metric!(time_raw("origin.download.size") = data.len() as u64);
        }

        result
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, video_id: &VideoId, deadline: Instant) -> Result<Bytes, FetchError> {
        match self
            .download_variant(video_id, ThumbnailVariant::MaxRes, deadline)
            .await
        {
            Ok(data) => Ok(data),
            Err(err) => {
                tracing::debug!(%video_id, %err, "maxres thumbnail unavailable, falling back to hq");
                self.download_variant(video_id, ThumbnailVariant::Hq, deadline)
                    .await
            }
        }
    }
}
