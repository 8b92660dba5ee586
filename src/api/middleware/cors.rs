//! CORS middleware configuration

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::debug;

const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];

/// Create a CORS layer with the specified allowed origins
///
/// An empty list allows only local development origins.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allowed_headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::CACHE_CONTROL,
    ];

    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing localhost only");
        vec![
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ]
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(allowed_headers)
        .allow_credentials(true)
}
