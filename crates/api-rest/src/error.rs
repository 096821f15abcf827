//! Gateway error type and its HTTP mapping.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} parameter is required")]
    MissingParameter(&'static str),
    #[error("invalid file upload: {0}")]
    InvalidMultipart(#[from] MultipartError),
    #[error("invalid file upload: missing `{0}` field")]
    MissingFileField(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend call failed: {0}")]
    Backend(#[from] tonic::Status),
    #[error("backend rejected the transfer with {0}")]
    Rejected(&'static str),
    #[error("failed to read from {src}: {message}")]
    Read { src: &'static str, message: String },
    #[error("failed to write to {src}: {message}")]
    Write { src: &'static str, message: String },
}

impl GatewayError {
    /// Error for the opening of a read-style call, where a missing file can still become a 404.
    pub(crate) fn from_read_status(status: tonic::Status) -> Self {
        if status.code() == tonic::Code::NotFound {
            Self::NotFound(status.message().to_string())
        } else {
            Self::Backend(status)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingParameter(_) | GatewayError::MissingFileField(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::InvalidMultipart(e) => e.status(),
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Backend(_)
            | GatewayError::Rejected(_)
            | GatewayError::Read { .. }
            | GatewayError::Write { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        // Backend details stay in the log.
        let body = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::MissingParameter("file_path").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::from_read_status(tonic::Status::not_found("x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::from_read_status(tonic::Status::internal("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Backend(tonic::Status::not_found("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Rejected("STATUS_ERROR").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_parameter_message() {
        assert_eq!(
            GatewayError::MissingParameter("src_path").to_string(),
            "src_path parameter is required"
        );
    }
}
