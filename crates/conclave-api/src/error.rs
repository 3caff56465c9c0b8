use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use conclave_shared::errors::ConclaveError;
use serde::Serialize;

/// Wraps [`ConclaveError`] so it can be returned directly from a handler;
/// the HTTP status follows `ConclaveError::http_status` (§7 "API errors map
/// to HTTP status codes").
#[derive(Debug)]
pub struct ApiError(pub ConclaveError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

impl From<ConclaveError> for ApiError {
    fn from(err: ConclaveError) -> Self {
        Self(err)
    }
}
