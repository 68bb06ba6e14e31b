//! Extension server error types

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type alias for extension server operations
pub type Result<T> = std::result::Result<T, ExtServerError>;

/// Extension server error type
#[derive(Error, Debug)]
pub enum ExtServerError {
    #[error("Extension file not found: {path}")]
    NotFound { path: String },

    #[error("Request escapes the extensions root: {path}")]
    SandboxViolation { path: String },

    #[error("Invalid extensions root '{root}': {reason}")]
    InvalidRoot { root: String, reason: String },

    #[error("Invalid server configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Server bind failed: {reason}")]
    BindFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {reason}")]
    Internal { reason: String },
}

impl ExtServerError {
    /// Check if this error should result in a 404 Not Found response
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtServerError::NotFound { .. })
    }

    /// Check if this error was caused by a request trying to leave the root
    pub fn is_sandbox_violation(&self) -> bool {
        matches!(self, ExtServerError::SandboxViolation { .. })
    }

    /// HTTP status reported to the client.
    ///
    /// Everything except a missing in-sandbox file fails closed with 500.
    pub fn status_code(&self) -> StatusCode {
        if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ExtServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // The reason phrase only; filesystem paths never reach the client.
        let body = status.canonical_reason().unwrap_or("Error");
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ExtServerError::NotFound { path: "/Extensions/nothing".to_string() };
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_everything_else_fails_closed() {
        let errors = vec![
            ExtServerError::SandboxViolation { path: "/../etc/passwd".to_string() },
            ExtServerError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")),
            ExtServerError::Internal { reason: "boom".to_string() },
        ];

        for err in errors {
            assert!(!err.is_not_found());
            assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_sandbox_violation_flag() {
        let err = ExtServerError::SandboxViolation { path: "/..".to_string() };
        assert!(err.is_sandbox_violation());
        assert!(!ExtServerError::NotFound { path: "/x".to_string() }.is_sandbox_violation());
    }

    #[tokio::test]
    async fn test_response_body_does_not_leak_path() {
        let err = ExtServerError::SandboxViolation { path: "/secret/location".to_string() };
        let response = err.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert_eq!(body, "Internal Server Error");
        assert!(!body.contains("secret"));
    }
}
