//! Gateway HTTP server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{Config, ServerConfig};
use crate::error::{AuroraError, Result};
use crate::proxy::forward::Forwarder;
use crate::proxy::pool::ProxyPool;
use crate::session::{AuthorizationGate, SessionIssuer};

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub issuer: Arc<SessionIssuer>,
    pub gate: AuthorizationGate,
    pub pool: Arc<ProxyPool>,
    pub forwarder: Arc<Forwarder>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, pool: Arc<ProxyPool>, issuer: Arc<SessionIssuer>) -> Self {
        let forwarder = Arc::new(Forwarder::new(pool.clone(), config.upstream.clone()));

        Self {
            gate: AuthorizationGate::new(issuer.clone()),
            config,
            issuer,
            pool,
            forwarder,
            started_at: Instant::now(),
        }
    }
}

/// Gateway server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            config: state.config.server.clone(),
            state,
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| AuroraError::InvalidConfig(format!("Invalid server address: {}", e)))?;

        let router = self.build_router();

        info!("Gateway listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| AuroraError::Internal(e.to_string()))?;

        info!("Gateway shut down");
        Ok(())
    }
}
