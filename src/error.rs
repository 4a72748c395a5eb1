//! HTTP error mapping (§4.G, §7): malformed or unauthenticated requests
//! become a small typed enum, rendered as a `{error_code, message,
//! http_status}` JSON envelope.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: i32,
    message: String,
    http_status: u16,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, i32, String) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, 2001, "Unauthorized".to_string()),
            ApiError::MalformedEvent(msg) => (StatusCode::BAD_REQUEST, 4000, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, 4040, msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message) = self.parts();
        let body = ErrorBody { error_code, message, http_status: status.as_u16() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401() {
        let (status, code, _) = ApiError::Unauthorized.parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, 2001);
    }

    #[test]
    fn not_found_maps_to_404() {
        let (status, _, _) = ApiError::NotFound("trace missing".into()).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
