use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Credential failures reported by the session issuer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("token expired")]
    Expired,

    #[error("token malformed")]
    Malformed,

    #[error("token invalid")]
    Invalid,

    #[error("token revoked")]
    Revoked,
}

impl SessionError {
    /// Short machine-readable reason, used in 401 bodies
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::Expired => "expired",
            SessionError::Malformed => "malformed",
            SessionError::Invalid => "invalid",
            SessionError::Revoked => "revoked",
        }
    }
}

/// Unified error type for the Aurora gateway
#[derive(Error, Debug)]
pub enum AuroraError {
    // Proxy errors
    #[error("Proxy pool exhausted")]
    PoolExhausted,

    #[error("Malformed proxy address: {0}")]
    MalformedProxyAddress(String),

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("All upstream attempts failed after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },

    #[error("Upstream not configured")]
    UpstreamNotConfigured,

    #[error("Upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    // Authentication errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Failed to sign token: {0}")]
    TokenSigning(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Aurora operations
pub type Result<T> = std::result::Result<T, AuroraError>;

impl AuroraError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AuroraError::InvalidRequest(_)
            | AuroraError::MalformedProxyAddress(_)
            | AuroraError::UnsupportedScheme(_)
            | AuroraError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AuroraError::Session(_) | AuroraError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }

            // 502 Bad Gateway
            AuroraError::ProxyConnectionFailed(_)
            | AuroraError::AttemptsExhausted { .. }
            | AuroraError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AuroraError::PoolExhausted | AuroraError::UpstreamNotConfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            AuroraError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            AuroraError::TokenSigning(_)
            | AuroraError::Io(_)
            | AuroraError::Http(_)
            | AuroraError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AuroraError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AuroraError::Session(e) => json!({
                "error": "unauthorized",
                "reason": e.reason(),
            }),
            _ => json!({
                "error": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<hyper::Error> for AuroraError {
    fn from(err: hyper::Error) -> Self {
        AuroraError::Http(err.to_string())
    }
}

impl From<url::ParseError> for AuroraError {
    fn from(err: url::ParseError) -> Self {
        AuroraError::MalformedProxyAddress(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuroraError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuroraError::TokenSigning(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            AuroraError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuroraError::MalformedProxyAddress("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuroraError::Session(SessionError::Revoked).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuroraError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuroraError::AttemptsExhausted { attempts: 3 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AuroraError::ResponseTooLarge { limit: 1024 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AuroraError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AuroraError::PoolExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(AuroraError::Session(SessionError::Expired).is_client_error());
        assert!(!AuroraError::Session(SessionError::Expired).is_server_error());

        assert!(AuroraError::PoolExhausted.is_server_error());
        assert!(!AuroraError::PoolExhausted.is_client_error());
    }

    #[test]
    fn test_session_error_reasons() {
        assert_eq!(SessionError::Expired.reason(), "expired");
        assert_eq!(SessionError::Malformed.reason(), "malformed");
        assert_eq!(SessionError::Invalid.reason(), "invalid");
        assert_eq!(SessionError::Revoked.reason(), "revoked");
    }

    #[test]
    fn test_url_parse_error_is_malformed_address() {
        let err: AuroraError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, AuroraError::MalformedProxyAddress(_)));
    }
}
