//! Liveness endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Hello, world!" }))
}

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

/// Health check endpoint with pool summary
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats();
    let status = if stats.usable() > 0 || stats.total == 0 {
        "healthy"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "service": "aurora",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "pool": stats,
        })),
    )
}
