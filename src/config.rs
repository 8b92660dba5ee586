use crate::error::{AuroraError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Upstream API configuration
    pub upstream: UpstreamConfig,
    /// Session token configuration
    pub session: SessionConfig,
    /// Login credentials
    pub admin: AdminConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the gateway (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Single proxy address (PROXY_URL)
    pub proxy_url: Option<String>,
    /// Newline-delimited proxy list file
    pub list_path: String,
    /// Consecutive failures before an endpoint is evicted
    pub failure_threshold: u32,
    /// Whether to TCP-probe candidates at startup
    pub probe_enabled: bool,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
    /// Overall bound on startup validation
    pub validation_timeout: Duration,
    /// Maximum probes in flight
    pub validation_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            list_path: "proxies.txt".to_string(),
            failure_threshold: 3,
            probe_enabled: true,
            probe_timeout: Duration::from_secs(5),
            validation_timeout: Duration::from_secs(15),
            validation_concurrency: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API (http only)
    pub url: Option<Url>,
    /// Bearer key sent to the upstream API
    pub api_key: Option<String>,
    /// Timeout for dialing through a proxy
    pub connect_timeout: Duration,
    /// Timeout for the upstream request/response
    pub request_timeout: Duration,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Dial upstream directly when the pool is exhausted
    pub direct_fallback: bool,
    /// Largest upstream response body relayed back
    pub max_response_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            max_retries: 2,
            direct_fallback: false,
            max_response_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// HMAC secret; empty means a random per-process key
    pub jwt_secret: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                port: get_env_or("SERVER_PORT", "8080").parse().map_err(|_| {
                    AuroraError::InvalidConfig("SERVER_PORT must be a valid port number".into())
                })?,
                host: get_env_or("SERVER_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            pool: PoolConfig {
                proxy_url: get_env_opt("PROXY_URL"),
                list_path: get_env_or("PROXY_LIST_PATH", "proxies.txt"),
                failure_threshold: parse_env("PROXY_FAILURE_THRESHOLD", 3u32)?.max(1),
                probe_enabled: parse_env("PROXY_PROBE_ENABLED", true)?,
                probe_timeout: Duration::from_secs(parse_env("PROXY_PROBE_TIMEOUT", 5u64)?),
                validation_timeout: Duration::from_secs(parse_env(
                    "PROXY_VALIDATION_TIMEOUT",
                    15u64,
                )?),
                validation_concurrency: parse_env("PROXY_VALIDATION_CONCURRENCY", 32usize)?
                    .max(1),
            },
            upstream: UpstreamConfig {
                url: parse_upstream_url()?,
                api_key: get_env_opt("UPSTREAM_API_KEY"),
                connect_timeout: Duration::from_secs(parse_env("UPSTREAM_CONNECT_TIMEOUT", 10u64)?),
                request_timeout: Duration::from_secs(parse_env(
                    "UPSTREAM_REQUEST_TIMEOUT",
                    120u64,
                )?),
                max_retries: parse_env("UPSTREAM_MAX_RETRIES", 2u32)?,
                direct_fallback: parse_env("UPSTREAM_DIRECT_FALLBACK", false)?,
                max_response_bytes: parse_env(
                    "UPSTREAM_MAX_RESPONSE_BYTES",
                    32 * 1024 * 1024usize,
                )?,
            },
            session: SessionConfig {
                jwt_secret: get_env_or("JWT_SECRET", ""),
                access_ttl: Duration::from_secs(parse_env("ACCESS_TOKEN_TTL", 900u64)?),
                refresh_ttl: Duration::from_secs(parse_env("REFRESH_TOKEN_TTL", 604_800u64)?),
            },
            admin: AdminConfig {
                username: get_env_or("AURORA_USER", "admin"),
                password: get_env_or("AURORA_PASSWORD", "admin"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_upstream_url() -> Result<Option<Url>> {
    let Some(raw) = get_env_opt("UPSTREAM_URL") else {
        return Ok(None);
    };

    let url = Url::parse(&raw).map_err(|e| {
        AuroraError::InvalidConfig(format!("UPSTREAM_URL must be a valid URL: {}", e))
    })?;

    if url.scheme() != "http" {
        return Err(AuroraError::InvalidConfig(format!(
            "UPSTREAM_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(AuroraError::InvalidConfig(
            "UPSTREAM_URL must include a host".into(),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(AuroraError::InvalidConfig(
            "UPSTREAM_URL must not include query/fragment".into(),
        ));
    }

    Ok(Some(url))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match get_env_opt(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AuroraError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))
        }),
    }
}

/// Get a non-empty environment variable
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
