use std::time::Duration;

use thumbnailer_service::service::ThumbnailError;
use thumbnailer_service::types::ThumbnailSource;
use thumbnailer_test::{OriginServer, videos};
use tokio::time::Instant;

use crate::setup_service;

#[tokio::test]
async fn test_download_then_cache() {
    let origin = OriginServer::new();
    let (service, _dir) = setup_service(&origin, 4);

    let url = format!("https://www.youtube.com/watch?v={}", videos::MAXRES);
    let first = service.get(&url).await.unwrap();
    assert_eq!(first.video_id.as_str(), videos::MAXRES);
    assert_eq!(first.source, ThumbnailSource::Origin);
    assert_eq!(
        first.data,
        OriginServer::thumbnail(videos::MAXRES, "maxresdefault.jpg")
    );

    let second = service.get(videos::MAXRES).await.unwrap();
    assert_eq!(second.source, ThumbnailSource::Cache);
    assert_eq!(second.data, first.data);

    assert_eq!(origin.accesses(), 1);
}

#[tokio::test]
async fn test_hq_fallback_is_cached() {
    let origin = OriginServer::new();
    let (service, _dir) = setup_service(&origin, 4);

    let url = format!("https://youtu.be/{}", videos::HQ_ONLY);
    let thumbnail = service.get(&url).await.unwrap();
    assert_eq!(
        thumbnail.data,
        OriginServer::thumbnail(videos::HQ_ONLY, "hqdefault.jpg")
    );

    service.get(videos::HQ_ONLY).await.unwrap();
    // maxres and hq once each
    assert_eq!(origin.accesses(), 2);
}

#[tokio::test]
async fn test_missing_video() {
    let origin = OriginServer::new();
    let (service, _dir) = setup_service(&origin, 4);

    for _ in 0..2 {
        let err = service.get(videos::MISSING).await.unwrap_err();
        assert!(matches!(err, ThumbnailError::NotFound), "{err:?}");
    }

    // nothing was cached, so both requests went to the origin
    assert_eq!(origin.accesses(), 4);
    assert!(!service.is_shutting_down());
}

#[tokio::test]
async fn test_broken_origin() {
    let origin = OriginServer::new();
    let (service, _dir) = setup_service(&origin, 4);

    let err = service.get(videos::BROKEN).await.unwrap_err();

    assert_eq!(err.code(), "internal");
    assert!(!service.is_shutting_down());
}

#[tokio::test]
async fn test_slow_origin() {
    let origin = OriginServer::new();
    let (service, _dir) = setup_service(&origin, 4);

    let start = Instant::now();
    let err = service
        .get_with_deadline(videos::SLOW, start + Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, ThumbnailError::DeadlineExceeded), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(2));
}
