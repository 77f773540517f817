//! Facade errors and their HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mtc_collector::CollectorError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed device id, query or connection entry
    BadRequest(String),
    /// Unknown device, or nothing collected for it yet
    NotFound(String),
    /// The durable store refused a connection change
    StoreUnavailable(String),
    Internal(String),
}

/// Body of every error response
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::StoreUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(error, %message, "Request failed");
        } else {
            tracing::debug!(error, %message, "Request rejected");
        }
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Store(e) => Self::StoreUnavailable(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use mtc_core::StoreError;

    use super::*;

    #[test]
    fn test_store_failures_are_unavailable() {
        let err = ApiError::from(CollectorError::Store(StoreError::Database("locked".into())));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(CollectorError::AlreadyRunning);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
