//! Session lifecycle handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::error::{AuroraError, Result};

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Refresh request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let mut diff = left.len() ^ right.len();

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

/// Verify credentials and issue the initial token pair
pub async fn session(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let admin = &state.config.admin;
    let matches = constant_time_str_eq(&req.username, &admin.username)
        & constant_time_str_eq(&req.password, &admin.password);
    if !matches {
        warn!("Login failed for user: {}", req.username);
        return Err(AuroraError::InvalidCredentials);
    }

    let pair = state.issuer.issue_initial(&req.username)?;
    info!("User {} logged in successfully", req.username);

    Ok((StatusCode::OK, Json(pair)))
}

/// Exchange a refresh token for a rotated pair
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse> {
    let pair = state.issuer.refresh(&req.refresh_token)?;
    Ok((StatusCode::OK, Json(pair)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_str_eq() {
        assert!(constant_time_str_eq("hunter2", "hunter2"));
        assert!(constant_time_str_eq("", ""));
        assert!(!constant_time_str_eq("hunter2", "hunter3"));
        assert!(!constant_time_str_eq("hunter2", "hunter22"));
        assert!(!constant_time_str_eq("", "hunter2"));
    }
}
