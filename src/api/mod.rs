//! API server implementation
//!
//! Provides the session endpoints and the protected routes relayed upstream.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
