use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thumbnailer_service::metric;
use thumbnailer_service::service::ThumbnailService;
use thumbnailer_service::types::VideoId;

use super::ResponseError;

/// JSON body of the thumbnail request.
#[derive(Debug, Deserialize)]
pub struct ThumbnailRequest {
    /// A video URL or a bare video id.
    pub url: String,
}

/// JSON body of a successful thumbnail response.
#[derive(Debug, Serialize)]
pub struct ThumbnailResponse {
    /// The reference from the request, unchanged.
    pub url: String,
    pub video_id: VideoId,
    /// The image, base64 encoded.
    pub data: String,
}

pub async fn get_thumbnail(
    State(service): State<ThumbnailService>,
    body: Result<Json<ThumbnailRequest>, JsonRejection>,
) -> Result<Json<ThumbnailResponse>, ResponseError> {
    if service.is_shutting_down() {
        return Err(ResponseError::unavailable());
    }
    let Json(body) = body?;

    sentry::configure_scope(|scope| scope.set_tag("request.url", &body.url));

    let thumbnail = service.get(&body.url).await?;
    metric!(
        counter("thumbnails.served") += 1,
        "source" => thumbnail.source.as_str(),
    );

    Ok(Json(ThumbnailResponse {
        url: body.url,
        video_id: thumbnail.video_id,
        data: STANDARD.encode(&thumbnail.data),
    }))
}
