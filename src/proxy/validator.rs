//! Startup validation of candidate proxies
//!
//! Each candidate is parsed and, optionally, TCP-probed. Parse failures are
//! dropped; probe failures are kept as degraded so they can recover through
//! normal usage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::error::{AuroraError, Result};
use crate::models::{EndpointStatus, ProxyAddress, ProxyEndpoint};

/// Connectivity check for a single proxy
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &ProxyAddress) -> Result<()>;
}

/// Plain TCP connect probe
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, address: &ProxyAddress) -> Result<()> {
        TcpStream::connect(address.authority())
            .await
            .map(|_| ())
            .map_err(|e| AuroraError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))
    }
}

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Whether to probe at all
    pub probe_enabled: bool,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
    /// Bound on the whole batch
    pub overall_timeout: Duration,
    /// Probes in flight at once
    pub concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            probe_enabled: true,
            probe_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(15),
            concurrency: 32,
        }
    }
}

impl From<&PoolConfig> for ValidatorConfig {
    fn from(pool: &PoolConfig) -> Self {
        Self {
            probe_enabled: pool.probe_enabled,
            probe_timeout: pool.probe_timeout,
            overall_timeout: pool.validation_timeout,
            concurrency: pool.validation_concurrency.max(1),
        }
    }
}

/// Classifies candidates as healthy or degraded
pub struct ProxyValidator {
    config: ValidatorConfig,
    probe: Arc<dyn Probe>,
}

impl ProxyValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self::with_probe(config, Arc::new(TcpProbe))
    }

    pub fn with_probe(config: ValidatorConfig, probe: Arc<dyn Probe>) -> Self {
        Self { config, probe }
    }

    /// Parse and probe a single candidate
    #[instrument(skip(self))]
    pub async fn validate(&self, candidate: &str) -> Result<ProxyEndpoint> {
        let endpoint = ProxyEndpoint::new(ProxyAddress::parse(candidate)?);
        Ok(self.probe_endpoint(endpoint).await)
    }

    /// Validate a batch concurrently.
    ///
    /// Malformed candidates are dropped. Probes still running when the
    /// overall timeout fires are abandoned and their endpoints come back as
    /// degraded. Output keeps input order.
    pub async fn validate_all(&self, candidates: &[String]) -> Vec<ProxyEndpoint> {
        let parsed: Vec<ProxyEndpoint> = candidates
            .iter()
            .filter_map(|raw| match ProxyAddress::parse(raw) {
                Ok(address) => Some(ProxyEndpoint::new(address)),
                Err(e) => {
                    warn!("Dropping proxy candidate {}: {}", raw, e);
                    None
                }
            })
            .collect();

        if parsed.is_empty() {
            return Vec::new();
        }

        info!("Validating {} proxy candidates", parsed.len());

        let mut results: Vec<Option<ProxyEndpoint>> = vec![None; parsed.len()];
        let deadline = deadline_after(self.config.overall_timeout);

        let mut probes = futures::stream::iter(parsed.iter().cloned().enumerate())
            .map(|(idx, endpoint)| async move { (idx, self.probe_endpoint(endpoint).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        loop {
            match timeout_at(deadline, probes.next()).await {
                Ok(Some((idx, endpoint))) => results[idx] = Some(endpoint),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Proxy validation timed out after {}s; pending candidates kept as degraded",
                        self.config.overall_timeout.as_secs()
                    );
                    break;
                }
            }
        }
        drop(probes);

        // abandoned probes keep last_validated_at unset
        let endpoints: Vec<ProxyEndpoint> = results
            .into_iter()
            .zip(parsed)
            .map(|(result, pending)| {
                result.unwrap_or_else(|| pending.with_status(EndpointStatus::Degraded))
            })
            .collect();

        let healthy = endpoints
            .iter()
            .filter(|e| e.status == EndpointStatus::Healthy)
            .count();
        info!(
            "Proxy validation complete: {} healthy, {} degraded",
            healthy,
            endpoints.len() - healthy
        );

        endpoints
    }

    async fn probe_endpoint(&self, mut endpoint: ProxyEndpoint) -> ProxyEndpoint {
        if !self.config.probe_enabled {
            endpoint.status = endpoint.status.on_probe(true);
            return endpoint;
        }

        let reachable = match timeout(
            self.config.probe_timeout,
            self.probe.probe(&endpoint.address),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!("Proxy {} is reachable", endpoint.address);
                true
            }
            Ok(Err(e)) => {
                warn!("Proxy {} failed probe: {}", endpoint.address, e);
                false
            }
            Err(_) => {
                warn!("Proxy {} probe timed out", endpoint.address);
                false
            }
        };

        endpoint.status = endpoint.status.on_probe(reachable);
        endpoint.last_validated_at = Some(Utc::now());
        endpoint
    }
}

/// Deadline `timeout` from now, clamped for durations past what `Instant` can hold
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}
