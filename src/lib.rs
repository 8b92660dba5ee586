//! Aurora - Authenticated API Gateway
//!
//! Accepts client requests, authenticates them with short-lived session
//! tokens, and relays them to an upstream API through a rotating pool of
//! outbound proxies.
//!
//! ## Features
//!
//! - HS256 access/refresh token pairs with single-use refresh rotation
//! - HTTP and SOCKS5 (local or remote DNS) upstream proxies
//! - Startup validation of the proxy list with bounded concurrency
//! - Round-robin selection that prefers healthy endpoints and evicts failing ones

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod session;

pub use config::Config;
pub use error::{AuroraError, Result};
