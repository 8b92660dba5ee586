//! Gateway route definitions

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::middleware::require_session;
use super::server::AppState;

/// Create the gateway router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/ping", get(handlers::health::ping))
        .route("/health", get(handlers::health::health_check))
        // Session lifecycle
        .route("/auth/session", post(handlers::auth::session))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .merge(protected_routes(state.clone()))
        .with_state(state)
}

/// Routes behind the authorization gate
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(handlers::upstream::relay))
        .route("/v1/models", get(handlers::upstream::relay))
        .route_layer(from_fn_with_state(state, require_session))
}
