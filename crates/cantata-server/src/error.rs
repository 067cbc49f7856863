//! Mapping of repository errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cantata_repository::RepositoryError;
use serde_json::json;
use tracing::{debug, warn};

/// Error returned by request handlers.
#[derive(Debug)]
pub struct ApiError(pub RepositoryError);

/// Handler result.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// 404 for `what`.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self(RepositoryError::not_found(what))
    }

    /// Status code served for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        Self(err)
    }
}

impl From<cantata_core::Error> for ApiError {
    fn from(err: cantata_core::Error) -> Self {
        Self(RepositoryError::Core(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({ "status": "error", "message": self.0.to_string() });
        if let RepositoryError::Core(core) = &self.0 {
            body["code"] = json!(core.code().as_str());
        }
        if status.is_server_error() {
            match &self.0 {
                RepositoryError::Core(core) => {
                    warn!(status = status.as_u16(), "request failed: {}", core.display_with_suggestions());
                }
                other => warn!(status = status.as_u16(), error = %other, "request failed"),
            }
        } else {
            debug!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}
