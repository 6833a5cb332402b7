use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests. Please retry later.";
const LOCKED_OUT_MESSAGE: &str =
    "Account temporarily locked due to repeated failures. Try again later.";

/// Errors visible on the request path.
///
/// Store and network failures inside the rate limiting layer never appear here;
/// they are absorbed by the limiter services (see [`crate::rate_limit::StoreError`]).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Generic limiter denial. The limiter name is kept for logs only.
    #[error("Too many requests for limiter '{0}'")]
    TooManyRequests(String),

    /// Brute-force lockout for an ip/username pair
    #[error("Account temporarily locked")]
    LockedOut,

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::LockedOut => StatusCode::LOCKED,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ServiceError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::UserAlreadyExists(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to callers.
    ///
    /// Denials use fixed text so a client learns nothing about which window or
    /// threshold fired. Internal failures are masked.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::TooManyRequests(_) => TOO_MANY_REQUESTS_MESSAGE.to_string(),
            ServiceError::LockedOut => LOCKED_OUT_MESSAGE.to_string(),
            ServiceError::Unauthorized(_) | ServiceError::InvalidToken(_) => {
                "Invalid credentials".to_string()
            }
            ServiceError::Config(_) | ServiceError::Internal(_) | ServiceError::Io(_) => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ServiceError::TooManyRequests("login".to_string()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ServiceError::LockedOut.status_code(), StatusCode::LOCKED);
        assert_eq!(
            ServiceError::UserAlreadyExists("alice".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::UserNotFound("u-1".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Validation("username".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_denial_message_hides_limiter() {
        let err = ServiceError::TooManyRequests("login-rate-limiter".to_string());
        assert!(err.to_string().contains("login-rate-limiter"));
        assert!(!err.public_message().contains("login-rate-limiter"));
        assert_eq!(err.public_message(), TOO_MANY_REQUESTS_MESSAGE);
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = ServiceError::Internal("redis pool exhausted".to_string());
        assert!(!err.public_message().contains("redis"));
    }

    #[tokio::test]
    async fn test_locked_out_response() {
        use http_body_util::BodyExt;

        let response = ServiceError::LockedOut.into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], 423);
        assert_eq!(value["error"], LOCKED_OUT_MESSAGE);
    }
}
