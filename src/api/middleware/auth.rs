//! Bearer-token middleware for protected routes

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::api::server::AppState;
use crate::session::GateDecision;

/// Reject the request with 401 unless it carries a valid access token.
///
/// The accepted [`crate::models::Identity`] is stored in request extensions.
pub async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    // a non-ASCII header value is treated like a wrong scheme
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());

    match state.gate.authorize(authorization) {
        GateDecision::Accepted(identity) => {
            debug!("Authorized {} for {}", identity.subject, req.uri().path());
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        GateDecision::Rejected(reason) => {
            debug!("Rejected {}: {}", req.uri().path(), reason.as_str());
            reason.into_response()
        }
    }
}
