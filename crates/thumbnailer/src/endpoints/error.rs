use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};
use thumbnailer_service::service::ThumbnailError;

/// An error returned from an endpoint, rendered as [`ApiErrorResponse`].
#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    code: &'static str,
    err: anyhow::Error,
}

impl ResponseError {
    /// The service is draining after a fatal error and takes no new requests.
    pub fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "unavailable",
            err: anyhow::anyhow!("service is shutting down"),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<ThumbnailError> for ResponseError {
    fn from(err: ThumbnailError) -> Self {
        let status = match err {
            ThumbnailError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ThumbnailError::NotFound => StatusCode::NOT_FOUND,
            ThumbnailError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ThumbnailError::Store(_) | ThumbnailError::Fetch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            code: err.code(),
            err: err.into(),
        }
    }
}

impl From<JsonRejection> for ResponseError {
    fn from(err: JsonRejection) -> Self {
        let status = err.status();
        let code = match status {
            StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
            status if status.is_client_error() => "invalid_argument",
            _ => "internal",
        };

        Self {
            status,
            code,
            err: anyhow::anyhow!(err.body_text()),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            capture_anyhow(&self.err);
        }
        let body = ApiErrorResponse::new(self.code, &self.err);
        let mut response = Json(body).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    pub code: String,
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl ApiErrorResponse {
    fn new(code: &str, err: &anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse {
            code: code.to_owned(),
            detail,
            causes,
        }
    }
}
