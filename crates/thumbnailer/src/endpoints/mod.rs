use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use thumbnailer_service::metric;
use thumbnailer_service::service::ThumbnailService;
use tower::ServiceBuilder;

mod error;
mod metrics;
mod thumbnail;

pub use error::{ApiErrorResponse, ResponseError};
use metrics::MetricsLayer;

use thumbnail::get_thumbnail as thumbnail;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: ThumbnailService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(DefaultBodyLimit::max(64 * 1024));
    Router::new()
        .route("/thumbnail", post(thumbnail))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
