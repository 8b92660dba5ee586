//! Shared proxy pool with round-robin selection and failure-driven eviction

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AuroraError, Result};
use crate::models::{EndpointStatus, ProxyAddress, ProxyEndpoint};

/// Per-status endpoint counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unvalidated: usize,
    pub evicted: usize,
}

impl PoolStats {
    /// Endpoints `select` may still return
    pub fn usable(&self) -> usize {
        self.total - self.evicted
    }
}

struct PoolState {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
}

impl PoolState {
    /// Next index at or after the cursor whose status satisfies `tier`
    fn next_matching(&self, tier: impl Fn(EndpointStatus) -> bool) -> Option<usize> {
        let len = self.endpoints.len();
        (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|&i| tier(self.endpoints[i].status))
    }

    fn position(&self, address: &ProxyAddress) -> Option<usize> {
        let key = address.key();
        self.endpoints.iter().position(|e| e.key() == key)
    }
}

/// Live set of upstream proxies
///
/// Endpoint list and rotation cursor sit behind one mutex; every operation
/// only touches in-memory bookkeeping, so the lock is never held across I/O.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    failure_threshold: u32,
}

impl ProxyPool {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: Mutex::new(PoolState {
                endpoints: Vec::new(),
                cursor: 0,
            }),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Build a pool from a validated batch
    pub fn with_endpoints(endpoints: Vec<ProxyEndpoint>, failure_threshold: u32) -> Self {
        let pool = Self::new(failure_threshold);
        pool.extend(endpoints);
        pool
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Merge a batch in one critical section, keeping the first entry per address.
    ///
    /// Returns how many endpoints were added.
    pub fn extend(&self, endpoints: Vec<ProxyEndpoint>) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;

        for endpoint in endpoints {
            if state.position(&endpoint.address).is_some() {
                debug!("Skipping duplicate proxy {}", endpoint.address);
                continue;
            }
            state.endpoints.push(endpoint);
            added += 1;
        }

        added
    }

    /// Manually admit an endpoint.
    ///
    /// An evicted entry with the same address is replaced in place; any other
    /// existing entry makes this a no-op.
    pub fn insert(&self, endpoint: ProxyEndpoint) -> bool {
        let mut state = self.state.lock();

        match state.position(&endpoint.address) {
            Some(i) if state.endpoints[i].status.is_evicted() => {
                info!("Re-admitting evicted proxy {}", endpoint.address);
                state.endpoints[i] = endpoint;
                true
            }
            Some(_) => false,
            None => {
                info!("Admitting proxy {}", endpoint.address);
                state.endpoints.push(endpoint);
                true
            }
        }
    }

    /// Pick the next endpoint.
    ///
    /// Healthy endpoints rotate first; degraded (or never validated) ones are
    /// used only when nothing healthy is left. Evicted endpoints are never
    /// returned.
    pub fn select(&self) -> Result<ProxyEndpoint> {
        let mut state = self.state.lock();

        if state.endpoints.is_empty() {
            return Err(AuroraError::PoolExhausted);
        }

        let idx = state
            .next_matching(|s| s == EndpointStatus::Healthy)
            .or_else(|| {
                state.next_matching(|s| {
                    matches!(s, EndpointStatus::Degraded | EndpointStatus::Unvalidated)
                })
            })
            .ok_or(AuroraError::PoolExhausted)?;

        state.cursor = (idx + 1) % state.endpoints.len();

        let endpoint = &mut state.endpoints[idx];
        endpoint.last_used_at = Some(Utc::now());
        Ok(endpoint.clone())
    }

    /// Record the result of a call routed through `address`.
    ///
    /// Returns the endpoint's new status, or `None` if the address is unknown.
    pub fn report_outcome(&self, address: &ProxyAddress, success: bool) -> Option<EndpointStatus> {
        let mut state = self.state.lock();
        let Some(idx) = state.position(address) else {
            debug!("Outcome reported for unknown proxy {}", address);
            return None;
        };

        let endpoint = &mut state.endpoints[idx];
        let before = endpoint.status;

        if before.is_evicted() {
            return Some(before);
        }

        if success {
            endpoint.consecutive_failures = 0;
            endpoint.status = before.on_success();
            if before != endpoint.status {
                info!("Proxy {} recovered ({} -> {})", address, before, endpoint.status);
            }
        } else {
            endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
            endpoint.status =
                before.on_failure(endpoint.consecutive_failures, self.failure_threshold);
            match endpoint.status {
                EndpointStatus::Evicted => warn!(
                    "Evicting proxy {} after {} consecutive failures",
                    address, endpoint.consecutive_failures
                ),
                _ => debug!(
                    "Proxy {} failed ({}/{})",
                    address, endpoint.consecutive_failures, self.failure_threshold
                ),
            }
        }

        Some(endpoint.status)
    }

    /// Start tracking a call through `endpoint`; see [`OutcomeGuard`]
    pub fn track(self: &Arc<Self>, endpoint: &ProxyEndpoint) -> OutcomeGuard {
        OutcomeGuard {
            pool: Arc::clone(self),
            address: endpoint.address.clone(),
            reported: false,
        }
    }

    pub fn snapshot(&self) -> Vec<ProxyEndpoint> {
        self.state.lock().endpoints.clone()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let mut stats = PoolStats {
            total: state.endpoints.len(),
            ..PoolStats::default()
        };

        for endpoint in &state.endpoints {
            match endpoint.status {
                EndpointStatus::Healthy => stats.healthy += 1,
                EndpointStatus::Degraded => stats.degraded += 1,
                EndpointStatus::Unvalidated => stats.unvalidated += 1,
                EndpointStatus::Evicted => stats.evicted += 1,
            }
        }

        stats
    }

    pub fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reports the outcome of one upstream call.
///
/// Dropping the guard without calling [`OutcomeGuard::success`] or
/// [`OutcomeGuard::failure`] counts as a failure, so calls abandoned by a
/// cancelled request still feed health accounting.
pub struct OutcomeGuard {
    pool: Arc<ProxyPool>,
    address: ProxyAddress,
    reported: bool,
}

impl OutcomeGuard {
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    pub fn success(mut self) {
        self.finish(true);
    }

    pub fn failure(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, success: bool) {
        if !self.reported {
            self.reported = true;
            self.pool.report_outcome(&self.address, success);
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.reported {
            debug!("Call through {} abandoned", self.address);
            self.finish(false);
        }
    }
}
