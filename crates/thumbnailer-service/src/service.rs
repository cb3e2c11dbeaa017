//! The cache-aside request flow.
//!
//! Every request runs through the same steps:
//!
//! 1. The reference is resolved into a [`VideoId`]. Invalid references are rejected before
//!    anything else happens.
//! 2. The cache is consulted. A fresh entry is returned right away.
//! 3. On a miss (or a stale entry) an [`AdmissionTicket`](crate::admission::AdmissionTicket)
//!    is acquired and the thumbnail is downloaded from the origin.
//! 4. A downloaded thumbnail is written back into the cache before it is returned.
//!
//! All of this shares one deadline, fixed when the request arrives. Failures of the store are
//! fatal and reported to the [`ShutdownCoordinator`]; everything else only fails the request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;

use crate::admission::{AdmissionGate, DeadlineExceeded};
use crate::caching::{CacheStore, SqliteStore, StoreError};
use crate::config::Config;
use crate::download::{FetchError, Fetcher, HttpFetcher};
use crate::extract::{Extractor, InvalidVideoId, RegexExtractor};
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::types::{Thumbnail, ThumbnailSource, VideoId};

/// Why a thumbnail could not be returned.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    /// The reference did not contain a video id.
    #[error(transparent)]
    InvalidInput(#[from] InvalidVideoId),
    /// The origin has no thumbnail for the video.
    #[error("thumbnail not found")]
    NotFound,
    /// The request ran out of time.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The cache store failed. The service is shutting down.
    #[error("cache store failed")]
    Store(#[source] StoreError),
    /// The download failed for a reason other than absence or timeout.
    #[error("thumbnail download failed")]
    Fetch(#[source] FetchError),
}

impl From<DeadlineExceeded> for ThumbnailError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

impl ThumbnailError {
    /// A stable, machine readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ThumbnailError::InvalidInput(_) => "invalid_argument",
            ThumbnailError::NotFound => "not_found",
            ThumbnailError::DeadlineExceeded => "deadline_exceeded",
            ThumbnailError::Store(_) | ThumbnailError::Fetch(_) => "internal",
        }
    }
}

/// The values the request flow is tuned with.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// The number of downloads allowed to run at the same time.
    pub max_concurrent_fetches: usize,
    /// The time budget of one request.
    pub request_timeout: Duration,
    /// How long cached thumbnails are served.
    pub cache_ttl: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            request_timeout: config.request_timeout,
            cache_ttl: config.cache_ttl,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Serves thumbnails, shared by all concurrent requests.
#[derive(Debug, Clone)]
pub struct ThumbnailService {
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    gate: AdmissionGate,
    shutdown: ShutdownCoordinator,
    settings: ServiceSettings,
}

impl ThumbnailService {
    /// Creates the service with the sqlite store and the HTTP origin.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.cache_path)
            .with_context(|| format!("failed to open cache at {}", config.cache_path.display()))?;
        let fetcher =
            HttpFetcher::from_config(&config.origin).context("failed to create HTTP client")?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(fetcher),
            ServiceSettings::from_config(config),
        ))
    }

    /// Creates the service from its collaborators, recognizing video URLs and bare ids.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            extractor: Arc::new(RegexExtractor),
            store,
            fetcher,
            gate: AdmissionGate::new(settings.max_concurrent_fetches),
            shutdown: ShutdownCoordinator::new(),
            settings,
        }
    }

    /// Replaces the [`Extractor`] resolving references.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Resolves once a fatal error has been reported.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Returns the thumbnail for `reference`, within the configured request timeout.
    pub async fn get(&self, reference: &str) -> Result<Thumbnail, ThumbnailError> {
        let deadline = Instant::now() + self.settings.request_timeout;
        self.get_with_deadline(reference, deadline).await
    }

    /// Returns the thumbnail for `reference`, giving up at `deadline`.
    #[tracing::instrument(skip_all, fields(video_id))]
    pub async fn get_with_deadline(
        &self,
        reference: &str,
        deadline: Instant,
    ) -> Result<Thumbnail, ThumbnailError> {
        let video_id = match self.extractor.extract(reference) {
            Ok(video_id) => video_id,
            Err(err) => {
                metric!(counter("requests.invalid") += 1);
                tracing::debug!(reference, "Rejected invalid video reference");
                return Err(err.into());
            }
        };
        tracing::Span::current().record("video_id", video_id.as_str());

        if let Some(data) = self.lookup(&video_id, deadline).await? {
            return Ok(Thumbnail {
                video_id,
                data,
                source: ThumbnailSource::Cache,
            });
        }

        let data = self.fetch(&video_id, deadline).await?;
        self.write_through(&video_id, data.clone(), deadline)
            .await?;

        Ok(Thumbnail {
            video_id,
            data,
            source: ThumbnailSource::Origin,
        })
    }

    /// Returns the cached thumbnail if it is still fresh.
    async fn lookup(
        &self,
        video_id: &VideoId,
        deadline: Instant,
    ) -> Result<Option<Bytes>, ThumbnailError> {
        DeadlineExceeded::check(deadline)?;
        let entry = match tokio::time::timeout_at(deadline, self.store.get(video_id)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(err)) => return Err(self.store_failure(err)),
            Err(_elapsed) => {
                metric!(counter("caches.timeout") += 1, "op" => "get");
                return Err(ThumbnailError::DeadlineExceeded);
            }
        };

        match entry {
            Some(entry) if entry.is_fresh(Utc::now(), self.settings.cache_ttl) => {
                metric!(counter("caches.access") += 1, "hit" => "true");
                Ok(Some(entry.data))
            }
            Some(entry) => {
                metric!(counter("caches.access") += 1, "hit" => "stale");
                tracing::debug!(stored_at = %entry.stored_at, "Cached thumbnail expired");
                Ok(None)
            }
            None => {
                metric!(counter("caches.access") += 1, "hit" => "false");
                Ok(None)
            }
        }
    }

    /// Downloads the thumbnail while holding an admission ticket.
    async fn fetch(&self, video_id: &VideoId, deadline: Instant) -> Result<Bytes, ThumbnailError> {
        let ticket = self.gate.acquire(deadline).await?;
        // the wait for the ticket may have used up the remaining time
        DeadlineExceeded::check(deadline)?;

        let start = Instant::now();
        let result =
            match tokio::time::timeout_at(deadline, self.fetcher.fetch(video_id, deadline)).await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(FetchError::Timeout),
            };
        drop(ticket);

        let status = match &result {
            Ok(_) => "success",
            Err(err) => err.as_tag(),
        };
        metric!(timer("fetch.duration") = start.elapsed(), "status" => status);

        result.map_err(|err| match err {
            FetchError::NotFound => ThumbnailError::NotFound,
            FetchError::Timeout => ThumbnailError::DeadlineExceeded,
            err @ FetchError::Internal(_) => {
                tracing::warn!(error = &err as &dyn std::error::Error, "Thumbnail download failed");
                ThumbnailError::Fetch(err)
            }
        })
    }

    /// Persists a downloaded thumbnail.
    async fn write_through(
        &self,
        video_id: &VideoId,
        data: Bytes,
        deadline: Instant,
    ) -> Result<(), ThumbnailError> {
        DeadlineExceeded::check(deadline)?;
        let write = self.store.set(video_id, data, Utc::now());
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.store_failure(err)),
            Err(_elapsed) => {
                metric!(counter("caches.timeout") += 1, "op" => "set");
                Err(ThumbnailError::DeadlineExceeded)
            }
        }
    }

    fn store_failure(&self, err: StoreError) -> ThumbnailError {
        self.shutdown.report_fatal(&err);
        ThumbnailError::Store(err)
    }
}
