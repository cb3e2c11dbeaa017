//! Downloading a list of thumbnails into a directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

use crate::client::{ClientError, ThumbnailClient};

/// Collects the urls from `input`, one per line, followed by `args`.
///
/// Blank lines are skipped.
pub fn read_urls(input: Option<&Path>, args: &[String]) -> Result<Vec<String>> {
    let mut urls = Vec::new();

    if let Some(input) = input {
        let contents = std::fs::read_to_string(input)
            .with_context(|| format!("could not open {}", input.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned),
        );
    }

    urls.extend(args.iter().cloned());
    Ok(urls)
}

/// Makes sure `output` is a directory, creating it if needed.
pub fn prepare_output(output: &Path) -> Result<()> {
    match std::fs::metadata(output) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => anyhow::bail!("{} is not a directory", output.display()),
        Err(_) => std::fs::create_dir_all(output)
            .with_context(|| format!("could not create directory {}", output.display())),
    }
}

/// Downloads all `urls` into `output`, at most `parallelism` at a time.
///
/// Returns the number of thumbnails that were saved.
pub async fn download_all(
    client: &ThumbnailClient,
    urls: &[String],
    output: &Path,
    parallelism: usize,
) -> usize {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));

    let downloads = urls.iter().map(|url| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let result = {
                let _permit = semaphore.acquire().await.ok()?;
                client.get(url).await
            };
            save(url, result, output).await
        }
    });

    futures::future::join_all(downloads)
        .await
        .into_iter()
        .flatten()
        .count()
}

async fn save(
    url: &str,
    result: Result<crate::client::Thumbnail, ClientError>,
    output: &Path,
) -> Option<PathBuf> {
    let thumbnail = match result {
        Ok(thumbnail) => thumbnail,
        Err(err) => {
            log_error(url, &err);
            return None;
        }
    };

    let path = output.join(format!("{}.jpg", thumbnail.video_id));
    match tokio::fs::write(&path, &thumbnail.data).await {
        Ok(()) => {
            tracing::info!("Saved {}", path.display());
            Some(path)
        }
        Err(err) => {
            tracing::error!("{url}: could not write {}: {err}", path.display());
            None
        }
    }
}

fn log_error(url: &str, err: &ClientError) {
    match err {
        ClientError::NotFound => tracing::warn!("{url}: not found"),
        ClientError::InvalidUrl => tracing::warn!("{url}: invalid url"),
        ClientError::Timeout => tracing::warn!("{url}: timeout"),
        ClientError::Unavailable => tracing::warn!("{url}: unavailable"),
        err => tracing::error!("{url}: {}", error_chain(err)),
    }
}

fn error_chain(err: &ClientError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::post;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use thumbnailer_test::Server;

    use super::*;

    #[test]
    fn test_read_urls() {
        let input = thumbnailer_test::fixture("urls.txt");
        let args = vec!["dQw4w9WgXcQ".to_owned()];

        let urls = read_urls(Some(&input), &args).unwrap();

        assert_eq!(
            urls,
            [
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "https://youtu.be/jNQXAC9IVRw",
                "https://www.youtube.com/watch?x=dQw4w9WgXcQ",
                "dQw4wXXXXXX",
                "dQw4w9WgXcQ",
            ]
        );
    }

    #[test]
    fn test_read_urls_missing_file() {
        let dir = thumbnailer_test::tempdir();
        assert!(read_urls(Some(&dir.path().join("missing.txt")), &[]).is_err());
    }

    #[test]
    fn test_prepare_output() {
        let dir = thumbnailer_test::tempdir();

        let nested = dir.path().join("a").join("b");
        prepare_output(&nested).unwrap();
        assert!(nested.is_dir());
        prepare_output(&nested).unwrap();

        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(prepare_output(&file).is_err());
    }

    /// Serves a thumbnail for bare video ids and rejects everything else.
    fn server() -> Server {
        async fn handler(body: String) -> axum::response::Response {
            use axum::response::IntoResponse;

            let value: serde_json::Value = serde_json::from_str(&body).unwrap();
            let url = value["url"].as_str().unwrap().to_owned();
            if url.len() != 11 {
                return (axum::http::StatusCode::BAD_REQUEST, "{}").into_response();
            }
            let body = serde_json::json!({
                "url": url,
                "video_id": url,
                "data": STANDARD.encode(format!("jpg {url}")),
            });
            axum::Json(body).into_response()
        }

        Server::with_router(Router::new().route("/thumbnail", post(handler)))
    }

    #[tokio::test]
    async fn test_download_all() {
        thumbnailer_test::setup();
        let server = server();
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();
        let dir = thumbnailer_test::tempdir();
        let urls = vec![
            "dQw4w9WgXcQ".to_owned(),
            "not a video".to_owned(),
            "jNQXAC9IVRw".to_owned(),
        ];

        for parallelism in [1, 8] {
            let saved = download_all(&client, &urls, dir.path(), parallelism).await;
            assert_eq!(saved, 2);
        }

        let data = std::fs::read(dir.path().join("dQw4w9WgXcQ.jpg")).unwrap();
        assert_eq!(data, b"jpg dQw4w9WgXcQ");
        assert!(dir.path().join("jNQXAC9IVRw.jpg").exists());
    }
}
