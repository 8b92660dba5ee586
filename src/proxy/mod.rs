//! Upstream proxy pool
//!
//! This module provides the egress side of the gateway:
//! - Gathering candidate proxy addresses
//! - Startup validation with bounded concurrency
//! - Round-robin selection with failure accounting
//! - Dialing HTTP and SOCKS5 proxies and relaying requests with retry

pub mod forward;
pub mod pool;
pub mod source;
pub mod transport;
pub mod validator;

pub use forward::{ForwardRequest, Forwarder};
pub use pool::{OutcomeGuard, PoolStats, ProxyPool};
pub use source::ProxySource;
pub use transport::ProxyTransport;
pub use validator::{Probe, ProxyValidator, TcpProbe, ValidatorConfig};
