//! Mapping of domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use vaultgate_common::Error;

/// Domain error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// Status code for each error kind.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Authentication => StatusCode::UNAUTHORIZED,
        Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Error::NotFound(_) | Error::PathTraversal(_) => StatusCode::NOT_FOUND,
        Error::MountTimeout(_) | Error::VaultUnavailable(_) | Error::VaultBusy(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::IsADirectory(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        // Vault paths, helper output and I/O details stay in the log.
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %self.0, "Request failed");
                "Internal server error".to_string()
            }
            StatusCode::NOT_FOUND => "Not found".to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "Vault temporarily unavailable".to_string(),
            _ => self.0.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Authentication, StatusCode::UNAUTHORIZED),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (Error::NotFound("/x".into()), StatusCode::NOT_FOUND),
            (Error::PathTraversal("/..".into()), StatusCode::NOT_FOUND),
            (
                Error::MountTimeout(Duration::from_secs(1)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::VaultUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::VaultBusy("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::PayloadTooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (Error::IsADirectory("/d".into()), StatusCode::BAD_REQUEST),
            (Error::AlreadyExists("/d".into()), StatusCode::CONFLICT),
            (Error::Crypto("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{:?}", err);
        }
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let response = ApiError(Error::Crypto("key material leaked?".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
