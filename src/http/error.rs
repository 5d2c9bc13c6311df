use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::errors::SamAreaError;

pub const NO_FILE_PROVIDED: &str = "No file provided";
pub const INVALID_FILENAME: &str = "Invalid filename";

/// Errors as the HTTP surface reports them: a status plus a JSON
/// `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    /// Client mistake; the message is returned verbatim.
    BadRequest(String),
    /// Any other status with a client-visible message.
    Status(StatusCode, String),
    /// Server-side failure. Logged; the client gets a generic message.
    Internal(SamAreaError),
}

impl ApiError {
    pub fn no_file() -> Self {
        Self::BadRequest(NO_FILE_PROVIDED.to_string())
    }

    pub fn invalid_filename() -> Self {
        Self::BadRequest(INVALID_FILENAME.to_string())
    }
}

impl From<SamAreaError> for ApiError {
    fn from(err: SamAreaError) -> Self {
        match err {
            SamAreaError::Validation { ref field, .. } if field == "filename" => {
                Self::invalid_filename()
            }
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Status(status, message) => (status, message),
            Self::Internal(err) => {
                error!(error = %err, source = ?std::error::Error::source(&err), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
