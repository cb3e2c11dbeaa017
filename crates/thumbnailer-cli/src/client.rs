//! A client for the thumbnail endpoint with caller-side retries.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The time budget of one thumbnail, across all attempts.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The pause between two attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Why a thumbnail could not be downloaded.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url")]
    InvalidUrl,
    #[error("not found")]
    NotFound,
    #[error("timeout")]
    Timeout,
    #[error("unavailable")]
    Unavailable,
    #[error("server error {status}: {detail}")]
    Server { status: StatusCode, detail: String },
    #[error("request failed")]
    Http(#[from] reqwest::Error),
    #[error("invalid thumbnail data")]
    Decode(#[from] base64::DecodeError),
}

impl ClientError {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Unavailable => true,
            ClientError::Http(err) => err.is_connect(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ThumbnailRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ThumbnailResponse {
    video_id: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<String>,
}

/// A downloaded thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub video_id: String,
    pub data: Vec<u8>,
}

/// Talks to a thumbnailer server.
#[derive(Debug, Clone)]
pub struct ThumbnailClient {
    client: reqwest::Client,
    endpoint: Url,
    max_attempts: usize,
}

impl ThumbnailClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// Requests are retried `max_retries` times in total, where `0` disables retries.
    pub fn new(base_url: &Url, max_retries: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .build()?;
        let endpoint = base_url.join("thumbnail")?;

        Ok(Self {
            client,
            endpoint,
            max_attempts: max_retries.max(1),
        })
    }

    /// Downloads the thumbnail for `url`, retrying while the server is unavailable.
    pub async fn get(&self, url: &str) -> Result<Thumbnail, ClientError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.get_with_retries(url))
            .await
            .unwrap_or(Err(ClientError::Timeout))
    }

    async fn get_with_retries(&self, url: &str) -> Result<Thumbnail, ClientError> {
        let mut attempt = 1;
        loop {
            match self.request(url).await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(url, attempt, error = %err, "Retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                result => return result,
            }
        }
    }

    async fn request(&self, url: &str) -> Result<Thumbnail, ClientError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&ThumbnailRequest { url })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: ThumbnailResponse = response.json().await?;
            let data = STANDARD.decode(body.data)?;
            return Ok(Thumbnail {
                video_id: body.video_id,
                data,
            });
        }

        Err(match status {
            StatusCode::BAD_REQUEST => ClientError::InvalidUrl,
            StatusCode::NOT_FOUND => ClientError::NotFound,
            StatusCode::GATEWAY_TIMEOUT => ClientError::Timeout,
            StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable,
            status => {
                let body: ErrorResponse = response.json().await.unwrap_or_default();
                ClientError::Server {
                    status,
                    detail: body.detail.unwrap_or_default(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode as AxumStatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use thumbnailer_test::Server;

    use super::*;

    const PAYLOAD: &[u8] = b"\xff\xd8\xffthumbnail";

    /// Answers 503 for the first `failures` requests, then succeeds.
    fn flaky_server(failures: usize) -> (Server, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));

        async fn handler(State((calls, failures)): State<(Arc<AtomicUsize>, usize)>) -> Response {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < failures {
                return (
                    AxumStatusCode::SERVICE_UNAVAILABLE,
                    r#"{"code":"unavailable","detail":"service is shutting down"}"#,
                )
                    .into_response();
            }
            let body = format!(
                r#"{{"url":"dQw4w9WgXcQ","video_id":"dQw4w9WgXcQ","data":"{}"}}"#,
                STANDARD.encode(PAYLOAD)
            );
            ([("content-type", "application/json")], body).into_response()
        }

        let router = Router::new()
            .route("/thumbnail", post(handler))
            .with_state((calls.clone(), failures));
        (Server::with_router(router), calls)
    }

    fn status_server(status: AxumStatusCode) -> Server {
        let router = Router::new().route(
            "/thumbnail",
            post(move || async move {
                (
                    status,
                    [("content-type", "application/json")],
                    r#"{"code":"x","detail":"database is locked"}"#,
                )
            }),
        );
        Server::with_router(router)
    }

    #[tokio::test]
    async fn test_success() {
        thumbnailer_test::setup();
        let (server, calls) = flaky_server(0);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();

        let thumbnail = client.get("dQw4w9WgXcQ").await.unwrap();

        assert_eq!(thumbnail.video_id, "dQw4w9WgXcQ");
        assert_eq!(thumbnail.data, PAYLOAD);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_while_unavailable() {
        thumbnailer_test::setup();
        let (server, calls) = flaky_server(2);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();

        let thumbnail = client.get("dQw4w9WgXcQ").await.unwrap();

        assert_eq!(thumbnail.data, PAYLOAD);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        thumbnailer_test::setup();
        let (server, calls) = flaky_server(10);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();

        let err = client.get("dQw4w9WgXcQ").await.unwrap_err();

        assert!(matches!(err, ClientError::Unavailable), "{err:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_is_one_attempt() {
        thumbnailer_test::setup();
        let (server, calls) = flaky_server(10);
        let client = ThumbnailClient::new(&server.url("/"), 0).unwrap();

        client.get("dQw4w9WgXcQ").await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_classification() {
        thumbnailer_test::setup();

        let server = status_server(AxumStatusCode::BAD_REQUEST);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();
        let err = client.get("not a video").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl), "{err:?}");

        let server = status_server(AxumStatusCode::NOT_FOUND);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();
        let err = client.get("dQw4wXXXXXX").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound), "{err:?}");

        let server = status_server(AxumStatusCode::GATEWAY_TIMEOUT);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();
        let err = client.get("dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout), "{err:?}");

        let server = status_server(AxumStatusCode::INTERNAL_SERVER_ERROR);
        let client = ThumbnailClient::new(&server.url("/"), 3).unwrap();
        let err = client.get("dQw4w9WgXcQ").await.unwrap_err();
        match err {
            ClientError::Server { status, detail } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(detail, "database is locked");
            }
            err => panic!("unexpected error {err:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        thumbnailer_test::setup();
        let url = {
            let (server, _) = flaky_server(0);
            server.url("/")
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let client = ThumbnailClient::new(&url, 2).unwrap();

        let err = client.get("dQw4w9WgXcQ").await.unwrap_err();

        assert!(matches!(err, ClientError::Http(_)), "{err:?}");
    }
}
