//! Cache-aside thumbnail service.
//!
//! Resolves video references into canonical [`VideoId`](types::VideoId)s, serves thumbnails
//! from a persistent cache while they are fresh, and otherwise fetches them from the origin
//! under a bounded number of concurrent downloads before writing them back.
//!
//! The entry point is [`ThumbnailService`](service::ThumbnailService).

#[macro_use]
pub mod metrics;

pub mod admission;
pub mod caching;
pub mod config;
pub mod download;
pub mod extract;
pub mod logging;
pub mod service;
pub mod shutdown;
pub mod types;
pub mod utils;
