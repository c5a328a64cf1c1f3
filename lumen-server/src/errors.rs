//! HTTP error mapping for the read API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lumen_core::IndexError;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub IndexError);

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IndexError::NotFound(_) => StatusCode::NOT_FOUND,
            IndexError::ScanAlreadyRunning => StatusCode::CONFLICT,
            IndexError::PhotosRootMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(target: "api", error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({
                "status": "error",
                "error": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
