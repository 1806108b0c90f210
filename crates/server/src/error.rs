use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lanshare_upload::UploadError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("missing or unsupported protocol version")]
    PreconditionFailed,

    #[error("offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: i64, got: i64 },

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("upload too large: {size} bytes (max {max})")]
    TooLarge { size: i64, max: i64 },

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<UploadError> for ServerError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::NotFound => ServerError::NotFound,
            UploadError::TooLarge(size, max) => ServerError::TooLarge { size, max },
            UploadError::LengthExceeded(len) => {
                ServerError::BadRequest(format!("body exceeds declared length {len}"))
            }
            UploadError::LengthAlreadyDeclared => {
                ServerError::BadRequest("upload length already declared".into())
            }
            UploadError::OffsetMismatch { expected, got } => {
                ServerError::OffsetMismatch { expected, got }
            }
            UploadError::ConcatUnsupported => ServerError::NotImplemented,
            UploadError::Io(e) => ServerError::Internal(format!("storage error: {e}")),
            UploadError::Meta(e) => ServerError::Internal(format!("sidecar error: {e}")),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PreconditionFailed => (StatusCode::PRECONDITION_FAILED, self.to_string()),
            ServerError::OffsetMismatch { .. } => (StatusCode::CONFLICT, self.to_string()),
            ServerError::UnsupportedMediaType => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ServerError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::NotImplemented => (StatusCode::NOT_IMPLEMENTED, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_to_statuses() {
        let cases = [
            (ServerError::from(UploadError::NotFound), StatusCode::NOT_FOUND),
            (
                ServerError::from(UploadError::TooLarge(2, 1)),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ServerError::from(UploadError::ConcatUnsupported),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                ServerError::from(UploadError::LengthExceeded(10)),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ServerError::Internal("disk exploded at /secret/path".into());
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
