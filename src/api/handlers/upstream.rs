//! Protected routes relayed to the upstream API

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::IntoResponse;
use axum::Extension;
use tracing::debug;

use crate::api::server::AppState;
use crate::error::Result;
use crate::models::Identity;
use crate::proxy::forward::ForwardRequest;

/// Relay the request body untouched to the same path upstream
pub async fn relay(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    debug!("Relaying {} {} for {}", method, path, identity.subject);

    let response = state
        .forwarder
        .forward(ForwardRequest {
            method,
            path,
            headers,
            body,
        })
        .await?;

    Ok(response)
}
