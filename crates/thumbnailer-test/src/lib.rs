//! Helpers for testing the thumbnail service, its web server and its client.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], hold the handle to the temp directory for the entire lifetime of
//!    the test (e.g. `let _dir = thumbnailer_test::tempdir()`). A sqlite database in a dropped
//!    directory fails on the next write.
//!
//!  - When using [`OriginServer`], hold the server until all requests to it have been made.
//!    It stops serving when dropped.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{self, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use reqwest::{StatusCode, Url};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the thumbnailer crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "thumbnailer_service=trace,thumbnailer=trace,thumbnailer_cli=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Video ids with a known behavior on the [`OriginServer`].
pub mod videos {
    /// Has both resolutions.
    pub const MAXRES: &str = "dQw4w9WgXcQ";
    /// Only has the lower resolution.
    pub const HQ_ONLY: &str = "jNQXAC9IVRw";
    /// The highest resolution fails with a server error, the lower one works.
    pub const MAXRES_BROKEN: &str = "9bZkp7q19f0";
    /// Every request fails with a server error.
    pub const BROKEN: &str = "brokenVideo";
    /// Every request takes [`SLOW_DELAY`](super::SLOW_DELAY) before it is answered.
    pub const SLOW: &str = "slowVideo00";
    /// Not known to the origin.
    pub const MISSING: &str = "dQw4wXXXXXX";
}

/// How long the origin takes to answer for [`videos::SLOW`].
pub const SLOW_DELAY: Duration = Duration::from_secs(2);

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Serves `router` until the server is dropped.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

async fn count_hits(
    State(hits): State<Hits>,
    extract::OriginalUri(uri): extract::OriginalUri,
    req: Request,
    next: Next,
) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        let hits = hits.entry(uri.to_string()).or_default();
        *hits += 1;
    }

    next.run(req).await
}

async fn serve_thumbnail(
    extract::Path((video_id, file)): extract::Path<(String, String)>,
) -> Response {
    let available = match (video_id.as_str(), file.as_str()) {
        (videos::MAXRES, "maxresdefault.jpg" | "hqdefault.jpg") => true,
        (videos::HQ_ONLY, "hqdefault.jpg") => true,
        (videos::MAXRES_BROKEN, "maxresdefault.jpg") => {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        (videos::MAXRES_BROKEN, "hqdefault.jpg") => true,
        (videos::BROKEN, _) => return StatusCode::BAD_GATEWAY.into_response(),
        (videos::SLOW, _) => {
            tokio::time::sleep(SLOW_DELAY).await;
            true
        }
        _ => false,
    };

    if available {
        OriginServer::thumbnail(&video_id, &file).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// A local stand-in for the thumbnail origin.
///
/// Serves `/vi/{video_id}/{file}` for the ids in [`videos`] and counts every request by path.
pub struct OriginServer {
    server: Server,
    hits: Hits,
}

impl OriginServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route("/vi/:video_id/:file", get(serve_thumbnail))
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// The body served for `file` of `video_id`.
    pub fn thumbnail(video_id: &str, file: &str) -> Vec<u8> {
        // JPEG start of image marker
        let mut data = vec![0xff, 0xd8, 0xff];
        data.extend_from_slice(format!("{file} of {video_id}").as_bytes());
        data
    }

    /// Returns the number of requests since the last call, and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the requests per path since the last call, and resets the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for OriginServer {
    fn default() -> Self {
        Self::new()
    }
}
