//! Per-request authorization decision

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::SessionIssuer;
use crate::error::SessionError;
use crate::models::Identity;

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingToken,
    BadScheme,
    Session(SessionError),
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingToken => "missing_token",
            RejectReason::BadScheme => "invalid_authorization_header",
            RejectReason::Session(e) => e.reason(),
        }
    }
}

impl IntoResponse for RejectReason {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(json!({ "error": "unauthorized", "reason": self.as_str() })),
        )
            .into_response()
    }
}

/// Outcome of checking one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Accepted(Identity),
    Rejected(RejectReason),
}

/// Bearer-token check consulted before any proxy is selected
#[derive(Clone)]
pub struct AuthorizationGate {
    issuer: Arc<SessionIssuer>,
}

impl AuthorizationGate {
    pub fn new(issuer: Arc<SessionIssuer>) -> Self {
        Self { issuer }
    }

    /// Decide on the raw `Authorization` header value
    pub fn authorize(&self, authorization: Option<&str>) -> GateDecision {
        self.authorize_at(authorization, Utc::now())
    }

    pub fn authorize_at(&self, authorization: Option<&str>, now: DateTime<Utc>) -> GateDecision {
        let Some(authorization) = authorization else {
            return GateDecision::Rejected(RejectReason::MissingToken);
        };

        let Some(token) = Self::extract_token(authorization) else {
            return GateDecision::Rejected(RejectReason::BadScheme);
        };

        match self.issuer.validate_at(token, now) {
            Ok(identity) => GateDecision::Accepted(identity),
            Err(e) => GateDecision::Rejected(RejectReason::Session(e)),
        }
    }

    /// Extract token from an `Authorization: Bearer <token>` value
    pub fn extract_token(authorization: &str) -> Option<&str> {
        let (scheme, token) = authorization.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::Duration;

    fn gate() -> (AuthorizationGate, Arc<SessionIssuer>) {
        let issuer = Arc::new(
            SessionIssuer::new(&SessionConfig {
                jwt_secret: "gate-secret".into(),
                ..SessionConfig::default()
            })
            .unwrap(),
        );
        (AuthorizationGate::new(issuer.clone()), issuer)
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(AuthorizationGate::extract_token("Bearer abc123"), Some("abc123"));
        assert_eq!(AuthorizationGate::extract_token("bearer  abc123 "), Some("abc123"));
        assert_eq!(AuthorizationGate::extract_token("abc123"), None);
        assert_eq!(AuthorizationGate::extract_token("Basic abc123"), None);
        assert_eq!(AuthorizationGate::extract_token("Bearer "), None);
    }

    #[test]
    fn test_missing_and_bad_scheme() {
        let (gate, _) = gate();
        assert_eq!(
            gate.authorize(None),
            GateDecision::Rejected(RejectReason::MissingToken)
        );
        assert_eq!(
            gate.authorize(Some("Token abc")),
            GateDecision::Rejected(RejectReason::BadScheme)
        );
    }

    #[test]
    fn test_accepts_valid_access_token() {
        let (gate, issuer) = gate();
        let pair = issuer.issue_initial("alice").unwrap();

        assert_eq!(
            gate.authorize(Some(&format!("Bearer {}", pair.access_token))),
            GateDecision::Accepted(Identity::new("alice"))
        );
    }

    #[test]
    fn test_rejects_refresh_and_expired_tokens() {
        let (gate, issuer) = gate();
        let now = Utc::now();
        let pair = issuer.issue_initial_at("alice", now).unwrap();

        assert_eq!(
            gate.authorize_at(Some(&format!("Bearer {}", pair.refresh_token)), now),
            GateDecision::Rejected(RejectReason::Session(SessionError::Invalid))
        );
        assert_eq!(
            gate.authorize_at(
                Some(&format!("Bearer {}", pair.access_token)),
                now + Duration::hours(1)
            ),
            GateDecision::Rejected(RejectReason::Session(SessionError::Expired))
        );
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(RejectReason::MissingToken.as_str(), "missing_token");
        assert_eq!(
            RejectReason::Session(SessionError::Revoked).as_str(),
            "revoked"
        );
    }
}
