//! API middleware

mod auth;
mod cors;

pub use auth::require_session;
pub use cors::cors_layer;
