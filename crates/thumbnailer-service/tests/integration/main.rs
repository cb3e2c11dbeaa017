use std::sync::Arc;
use std::time::Duration;

use thumbnailer_service::caching::SqliteStore;
use thumbnailer_service::download::HttpFetcher;
use thumbnailer_service::service::{ServiceSettings, ThumbnailService};
use thumbnailer_service::utils::http::create_client;
use thumbnailer_test::OriginServer;

mod orchestrator;
mod persistence;

/// Creates a service backed by a fresh sqlite file and the given origin.
fn setup_service(origin: &OriginServer, max_concurrent_fetches: usize) -> (ThumbnailService, tempfile::TempDir) {
    thumbnailer_test::setup();
    let dir = thumbnailer_test::tempdir();
    let store = SqliteStore::open(&dir.path().join("thumbnail.db")).unwrap();
    let client = create_client(Duration::from_secs(1)).unwrap();
    let fetcher = HttpFetcher::new(client, origin.url("/"));

    let settings = ServiceSettings {
        max_concurrent_fetches,
        request_timeout: Duration::from_secs(5),
        cache_ttl: Duration::from_secs(24 * 60 * 60),
    };
    let service = ThumbnailService::new(Arc::new(store), Arc::new(fetcher), settings);
    (service, dir)
}
