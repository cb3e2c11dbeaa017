use std::time::Duration;

use reqwest::redirect;

/// Creates the [`reqwest::Client`] used to talk to the origin.
///
/// * `connect_timeout` bounds establishing a connection. The overall time of a download is
///   bounded by the request deadline instead.
/// * At most 5 redirects are followed.
pub fn create_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::limited(5))
        .build()
}
