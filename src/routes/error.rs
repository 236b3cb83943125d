use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::engine::EngineError;

/// Error returned by every handler; rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid or missing credentials")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::InvalidOperation(_) | EngineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                EngineError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                EngineError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
                EngineError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                EngineError::NotFound => StatusCode::NOT_FOUND,
                EngineError::Forbidden => StatusCode::FORBIDDEN,
                EngineError::Conflict(_) => StatusCode::CONFLICT,
                EngineError::Transform(_)
                | EngineError::Store(_)
                | EngineError::Blob(_)
                | EngineError::Aborted(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
