//! Cache lifecycle handler
//!
//! Reacts to the three lifecycle events dispatched by the host:
//!
//! - install: pre-cache the fixed asset list into the current generation
//! - fetch: serve from the current generation, falling back to network
//! - activate: delete every generation that is not the current one
//!
//! The handler keeps no phase of its own. The storage and network it talks
//! to are injected so either can be swapped for a fake.

use crate::error::{OfflineError, Result};
use crate::network::Network;
use futures::future::join_all;
use generation_cache::{CacheStorage, CachedResponse, RequestKey};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What install does when some assets cannot be fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPolicy {
    /// Any failed asset fails the install and nothing is stored
    #[default]
    AllOrNothing,
    /// Store what could be fetched; fail only when nothing could
    BestEffort,
}

impl FromStr for InstallPolicy {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all-or-nothing" => Ok(InstallPolicy::AllOrNothing),
            "best-effort" => Ok(InstallPolicy::BestEffort),
            other => Err(OfflineError::Config(format!(
                "unknown INSTALL_POLICY: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for InstallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPolicy::AllOrNothing => write!(f, "all-or-nothing"),
            InstallPolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Primitives the host offers to a running handler
pub trait HostSignals: Send + Sync {
    /// Promote this worker to active without waiting for clients of the
    /// previous one to go away
    fn skip_waiting(&self);

    /// Take control of every open client without a reload
    fn claim_clients(&self);
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub cache_name: String,
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchSource {
    Cache,
    Network,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: CachedResponse,
    pub source: FetchSource,
}

/// Maintains one current cache generation and serves cache-first
pub struct CacheLifecycle {
    cache_name: String,
    assets: Vec<RequestKey>,
    policy: InstallPolicy,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl CacheLifecycle {
    pub fn new(
        cache_name: impl Into<String>,
        assets: Vec<RequestKey>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            assets,
            policy: InstallPolicy::default(),
            storage,
            network,
        }
    }

    pub fn with_policy(mut self, policy: InstallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Pre-cache every asset into the current generation.
    ///
    /// Asset fetches are issued concurrently and all are awaited. Under
    /// [`InstallPolicy::AllOrNothing`] a single failure leaves nothing
    /// behind: no entries are written and a generation created by this call
    /// is removed again.
    pub async fn handle_install(&self, host: &dyn HostSignals) -> Result<InstallReport> {
        info!(
            cache = %self.cache_name,
            assets = self.assets.len(),
            policy = %self.policy,
            "Installing and caching assets"
        );
        host.skip_waiting();

        let created = self.storage.open(&self.cache_name).await?;

        let results = join_all(self.assets.iter().map(|key| self.fetch_asset(key))).await;

        let mut entries = Vec::new();
        let mut errors = Vec::new();
        for (key, result) in self.assets.iter().zip(results) {
            match result {
                Ok(response) => entries.push((key.clone(), response)),
                Err(e) => {
                    warn!(cache = %self.cache_name, asset = %key.url, error = %e, "Failed to fetch asset");
                    errors.push((key.url.clone(), e));
                }
            }
        }

        let failed: Vec<String> = errors.iter().map(|(url, _)| url.clone()).collect();

        let fatal = match self.policy {
            InstallPolicy::AllOrNothing => errors.into_iter().next().map(|(_, e)| e),
            InstallPolicy::BestEffort if entries.is_empty() && !failed.is_empty() => Some(
                OfflineError::Install(format!("none of {} assets could be fetched", failed.len())),
            ),
            InstallPolicy::BestEffort => None,
        };
        if let Some(err) = fatal {
            self.discard_if_created(created).await;
            return Err(err);
        }

        let cached: Vec<String> = entries.iter().map(|(key, _)| key.url.clone()).collect();
        if let Err(e) = self.storage.put_all(&self.cache_name, entries).await {
            self.discard_if_created(created).await;
            return Err(e.into());
        }

        info!(
            cache = %self.cache_name,
            cached = cached.len(),
            failed = failed.len(),
            "Install complete"
        );
        Ok(InstallReport {
            cache_name: self.cache_name.clone(),
            cached,
            failed,
        })
    }

    async fn fetch_asset(&self, key: &RequestKey) -> Result<CachedResponse> {
        let response = self.network.fetch(key).await?;
        if !response.is_success() {
            return Err(OfflineError::AssetStatus {
                url: key.url.clone(),
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn discard_if_created(&self, created: bool) {
        if !created {
            return;
        }
        if let Err(e) = self.storage.delete(&self.cache_name).await {
            warn!(cache = %self.cache_name, error = %e, "Failed to discard partial generation");
        }
    }

    /// Serve a request from the current generation, or from the network on
    /// a miss. Never writes to the cache.
    pub async fn handle_fetch(&self, request: &RequestKey) -> Result<FetchOutcome> {
        if let Some(response) = self.storage.get(&self.cache_name, request).await? {
            debug!(request = %request, "Served from cache");
            return Ok(FetchOutcome {
                response,
                source: FetchSource::Cache,
            });
        }

        debug!(request = %request, "Cache miss, delegating to network");
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome {
            response,
            source: FetchSource::Network,
        })
    }

    /// Delete every generation other than the current one, then claim all
    /// open clients. Deletions run concurrently; failures are logged and
    /// otherwise ignored.
    pub async fn handle_activate(&self, host: &dyn HostSignals) -> ActivateReport {
        let mut report = ActivateReport::default();

        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list cache generations");
                Vec::new()
            }
        };

        let stale: Vec<String> = keys
            .into_iter()
            .filter(|key| *key != self.cache_name)
            .collect();

        let results = join_all(stale.iter().map(|key| {
            info!(cache = %key, "Removing stale cache");
            self.storage.delete(key)
        }))
        .await;

        for (key, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => report.deleted.push(key),
                Err(e) => {
                    warn!(cache = %key, error = %e, "Failed to remove stale cache");
                    report.failed.push(key);
                }
            }
        }

        host.claim_clients();
        report
    }
}
