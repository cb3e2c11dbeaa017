use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use thumbnailer_service::caching::{CacheStore, SqliteStore, purge_expired};
use thumbnailer_service::service::{ServiceSettings, ThumbnailService};
use thumbnailer_service::test::MockFetcher;
use thumbnailer_service::types::{ThumbnailSource, VideoId};

#[tokio::test]
async fn test_cache_survives_restart() {
    thumbnailer_test::setup();
    let dir = thumbnailer_test::tempdir();
    let path = dir.path().join("thumbnail.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let service =
            ThumbnailService::new(Arc::new(store), fetcher.clone(), ServiceSettings::default());
        let thumbnail = service.get("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(thumbnail.source, ThumbnailSource::Origin);
    }

    let store = SqliteStore::open(&path).unwrap();
    let fetcher = Arc::new(MockFetcher::new());
    let service =
        ThumbnailService::new(Arc::new(store), fetcher.clone(), ServiceSettings::default());
    let thumbnail = service.get("dQw4w9WgXcQ").await.unwrap();

    assert_eq!(thumbnail.source, ThumbnailSource::Cache);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_stale_row_is_replaced() {
    thumbnailer_test::setup();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
    store
        .set(&id, "stale".into(), Utc::now() - TimeDelta::hours(25))
        .await
        .unwrap();

    let fetcher = Arc::new(MockFetcher::new());
    let service = ThumbnailService::new(store.clone(), fetcher.clone(), ServiceSettings::default());

    let thumbnail = service.get("dQw4w9WgXcQ").await.unwrap();
    assert_eq!(thumbnail.source, ThumbnailSource::Origin);
    assert_eq!(fetcher.calls(), 1);

    let thumbnail = service.get("dQw4w9WgXcQ").await.unwrap();
    assert_eq!(thumbnail.source, ThumbnailSource::Cache);
    assert_eq!(thumbnail.data, MockFetcher::thumbnail(&id));

    // the stale row is still there until it is purged
    let ttl = service.settings().cache_ttl;
    assert_eq!(purge_expired(store.as_ref(), ttl).await.unwrap(), 1);
    assert!(store.get(&id).await.unwrap().is_some());
}
