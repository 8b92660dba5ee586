//! Candidate proxy ingestion
//!
//! Collects raw proxy addresses from the single configured address and the
//! optional list file. No network I/O happens here.

use std::io::ErrorKind;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::PoolConfig;
use crate::models::has_explicit_port;

/// Raw candidate origins
#[derive(Debug, Clone, Default)]
pub struct ProxySource {
    single: Option<String>,
    list: Option<String>,
}

impl ProxySource {
    pub fn new(single: Option<String>, list: Option<String>) -> Self {
        Self { single, list }
    }

    /// Build a source from configuration, reading the list file if present
    pub async fn load(config: &PoolConfig) -> Self {
        let list = read_list(&config.list_path).await;
        Self::new(config.proxy_url.clone(), list)
    }

    /// Concatenate both origins in order.
    ///
    /// List lines that fail to parse or carry no explicit port are dropped.
    pub fn gather(&self) -> Vec<String> {
        let mut candidates = Vec::new();

        if let Some(single) = self.single.as_deref().map(str::trim) {
            if !single.is_empty() {
                candidates.push(single.to_string());
            }
        }

        let Some(list) = self.list.as_deref() else {
            return candidates;
        };

        for line in list.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Err(e) = Url::parse(line) {
                warn!("proxy url is invalid: {} ({})", line, e);
                continue;
            }
            if !has_explicit_port(line) {
                debug!("Skipping proxy without port: {}", line);
                continue;
            }
            candidates.push(line.to_string());
        }

        candidates
    }
}

/// Read the list file; a missing file is simply no list
async fn read_list(path: &str) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            info!("Loaded proxy list from {}", path);
            Some(contents)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No proxy list at {}", path);
            None
        }
        Err(e) => {
            warn!("Failed to open {}: {}", path, e);
            None
        }
    }
}
