//! Error types for the credential proxy

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the credential proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned for every rejected token, whatever the reason.
pub const INVALID_TOKEN_MESSAGE: &str = "invalid or expired token";

/// Credential proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing secret, bad bind address, unreadable file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing, malformed, unknown, expired or revoked token
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport-level failure reaching the upstream origin
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// TTL rejected at issuance
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Scope rejected at issuance
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Authentication failure with the generic, non-distinguishing message.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::Authentication(INVALID_TOKEN_MESSAGE.to_string())
    }

    /// HTTP status this error maps to
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnavailable(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidTtl(_) | Self::InvalidScope(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `error.type` field in the JSON envelope
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_error",
            Self::InvalidTtl(_) | Self::InvalidScope(_) | Self::Json(_) => "invalid_request_error",
            _ => "api_error",
        }
    }

    /// Message exposed to the caller.
    ///
    /// Internal and configuration details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Authentication(msg)
            | Self::InvalidTtl(msg)
            | Self::InvalidScope(msg) => msg.clone(),
            Self::UpstreamUnavailable(msg) => format!("upstream request failed: {msg}"),
            Self::Http(e) => format!("upstream request failed: {e}"),
            Self::Json(e) => format!("invalid JSON body: {e}"),
            Self::Config(_) => "plugin not configured".to_string(),
            Self::Io(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Build the `{"error": {"type", "message"}}` envelope.
pub fn error_envelope(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "type": error_type,
                "message": message
            }
        })),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_envelope(self.status_code(), self.error_type(), &self.public_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_maps_to_401() {
        let err = Error::invalid_token();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type(), "authentication_error");
        assert_eq!(err.public_message(), INVALID_TOKEN_MESSAGE);
    }

    #[test]
    fn upstream_maps_to_502_with_transport_text() {
        let err = Error::UpstreamUnavailable("connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.public_message().contains("connection refused"));
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = Error::Internal("builder exploded at /secret/path".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal error");
    }

    #[test]
    fn invalid_ttl_is_a_client_error() {
        let err = Error::InvalidTtl("ttl must be positive".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");
    }
}
