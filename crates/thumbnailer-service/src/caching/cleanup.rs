use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use sentry::{Hub, SentryFutureExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;

use super::{CacheStore, SqliteStore, StoreError};

/// Entry function for the cleanup command.
///
/// Removes every entry of the configured cache that is older than `cache_ttl`.
pub async fn cleanup(config: &Config) -> Result<u64> {
    let store = SqliteStore::open(&config.cache_path)?;
    let removed = purge_expired(&store, config.cache_ttl).await?;
    tracing::info!("Removed {} expired thumbnails", removed);
    Ok(removed)
}

/// Deletes all entries that are older than `ttl`.
///
/// Entries exactly `ttl` old are still fresh and are kept.
pub async fn purge_expired(store: &dyn CacheStore, ttl: Duration) -> Result<u64, StoreError> {
    let ttl = TimeDelta::from_std(ttl)
        .map_err(|_| StoreError::Backend(format!("cache ttl {ttl:?} out of range")))?;
    let cutoff = Utc::now() - ttl;

    let removed = store.purge_older_than(cutoff).await?;
    metric!(counter("caches.purged") += removed as i64);
    Ok(removed)
}

/// Spawns a task purging expired entries every `interval`.
///
/// A failing sweep is reported to `shutdown` as fatal. The task ends once shutdown has been
/// triggered, whatever its cause.
pub fn spawn_cleanup(
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    interval: Duration,
    shutdown: ShutdownCoordinator,
) -> JoinHandle<()> {
    let signal = shutdown.signal();
    let task = async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = signal.triggered() => break,
                _ = ticker.tick() => {
                    match purge_expired(store.as_ref(), ttl).await {
                        Ok(removed) => tracing::debug!("Purged {} expired thumbnails", removed),
                        Err(err) => {
                            shutdown.report_fatal(&err);
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Cache cleanup task terminated");
    };

    tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::TimeDelta;

    use super::*;
    use crate::test::MemoryStore;
    use crate::types::VideoId;

    fn video_id(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_purge_expired() {
        thumbnailer_test::setup();
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .set(&video_id("oldvideo000"), Bytes::from_static(b"a"), now - TimeDelta::hours(25))
            .await
            .unwrap();
        store
            .set(&video_id("freshvideo0"), Bytes::from_static(b"b"), now)
            .await
            .unwrap();

        assert_eq!(purge_expired(&store, DAY).await.unwrap(), 1);
        assert!(store.get(&video_id("oldvideo000")).await.unwrap().is_none());
        assert!(store.get(&video_id("freshvideo0")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_cleanup_command() {
        thumbnailer_test::setup();
        let dir = thumbnailer_test::tempdir();
        let config = Config {
            cache_path: dir.path().join("thumbnail.db"),
            ..Config::default()
        };

        {
            let store = SqliteStore::open(&config.cache_path).unwrap();
            store
                .set(
                    &video_id("oldvideo000"),
                    Bytes::from_static(b"a"),
                    Utc::now() - TimeDelta::days(3),
                )
                .await
                .unwrap();
        }

        assert_eq!(cleanup(&config).await.unwrap(), 1);
        assert_eq!(cleanup(&config).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_periodic_sweep() {
        thumbnailer_test::setup();
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                &video_id("oldvideo000"),
                Bytes::from_static(b"a"),
                Utc::now() - TimeDelta::days(2),
            )
            .await
            .unwrap();

        let shutdown = ShutdownCoordinator::new();
        let task = spawn_cleanup(
            store.clone(),
            DAY,
            Duration::from_millis(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.get(&video_id("oldvideo000")).await.unwrap().is_none());
        assert!(store.purges() >= 1);
        assert!(!shutdown.is_shutting_down());

        task.abort();
    }

    #[tokio::test]
    async fn test_failing_sweep_is_fatal() {
        thumbnailer_test::setup();
        let store = Arc::new(MemoryStore::new());
        store.fail_purges("disk I/O error");

        let shutdown = ShutdownCoordinator::new();
        let task = spawn_cleanup(store, DAY, Duration::from_millis(10), shutdown.clone());

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_shutting_down());
        assert_eq!(shutdown.reason(), Some("store failure: disk I/O error"));
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        thumbnailer_test::setup();
        let store = Arc::new(MemoryStore::new());
        let shutdown = ShutdownCoordinator::new();
        let task = spawn_cleanup(store, DAY, Duration::from_secs(3600), shutdown.clone());

        shutdown.report_fatal(&StoreError::Backend("elsewhere".into()));

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
