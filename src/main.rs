//! Aurora Gateway - Entry Point
//!
//! Validates the proxy pool, then serves the gateway with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aurora::api::{ApiServer, AppState};
use aurora::config::LogConfig;
use aurora::proxy::{ProxyPool, ProxySource, ProxyValidator, ValidatorConfig};
use aurora::session::SessionIssuer;
use aurora::{Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);

    info!("Starting Aurora Gateway");

    // Gather and validate proxy candidates
    let source = ProxySource::load(&config.pool).await;
    let candidates = source.gather();
    info!("Found {} proxy candidates", candidates.len());

    let validator = ProxyValidator::new(ValidatorConfig::from(&config.pool));
    let endpoints = validator.validate_all(&candidates).await;

    let pool = Arc::new(ProxyPool::with_endpoints(
        endpoints,
        config.pool.failure_threshold,
    ));
    let stats = pool.stats();
    info!(
        "Proxy pool ready: {} total, {} healthy, {} degraded",
        stats.total, stats.healthy, stats.degraded
    );
    if stats.total == 0 {
        warn!("Proxy pool is empty; protected routes will return 503");
    }
    if config.upstream.url.is_none() {
        warn!("UPSTREAM_URL is not set; protected routes will return 503");
    }

    // Session tokens
    let issuer = Arc::new(SessionIssuer::new(&config.session)?);
    if config.session.jwt_secret.is_empty() {
        warn!("JWT_SECRET is not set; sessions will not survive a restart");
    }

    let addr = config.server_addr();
    let api_server = ApiServer::new(AppState::new(config, pool, issuer));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(shutdown_rx).await {
            error!("Gateway error: {}", e);
        }
    });

    info!("Gateway started on {}", addr);

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = api_task.await;

    info!("Aurora Gateway stopped");
    Ok(())
}

/// Install the global subscriber; RUST_LOG overrides LOG_LEVEL
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aurora={},tower_http=debug", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
