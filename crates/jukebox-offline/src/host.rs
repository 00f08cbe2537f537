//! Host runtime that drives the cache lifecycle
//!
//! Dispatches install, activate and fetch events to a [`CacheLifecycle`],
//! awaits each handler before advancing the worker state, and acts on the
//! skip-waiting and claim signals the handler raises.

use crate::error::{OfflineError, Result};
use crate::lifecycle::{
    ActivateReport, CacheLifecycle, FetchOutcome, HostSignals, InstallReport,
};
use generation_cache::RequestKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(RequestKey),
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetched(FetchOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClientId(pub u64);

#[derive(Default)]
struct SignalFlags {
    skip_waiting: AtomicBool,
    claim: AtomicBool,
}

impl HostSignals for SignalFlags {
    fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    fn claim_clients(&self) {
        self.claim.store(true, Ordering::SeqCst);
    }
}

/// Runs one worker generation through install, activate and fetch
pub struct WorkerHost {
    handler: CacheLifecycle,
    state: RwLock<WorkerState>,
    signals: SignalFlags,
    /// Open clients and whether this worker controls them
    clients: RwLock<BTreeMap<ClientId, bool>>,
    next_client: AtomicU64,
}

impl WorkerHost {
    pub fn new(handler: CacheLifecycle) -> Self {
        Self {
            handler,
            state: RwLock::new(WorkerState::Parsed),
            signals: SignalFlags::default(),
            clients: RwLock::new(BTreeMap::new()),
            next_client: AtomicU64::new(1),
        }
    }

    pub fn handler(&self) -> &CacheLifecycle {
        &self.handler
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Register an open client. New clients start out uncontrolled.
    pub async fn register_client(&self) -> ClientId {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        self.clients.write().await.insert(id, false);
        id
    }

    pub async fn controlled_clients(&self) -> Vec<ClientId> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|(_, controlled)| **controlled)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Install, then activate straight away when the worker may skip
    /// waiting or no client is holding on to a previous generation.
    ///
    /// Returns the activation report, or `None` if the worker is left
    /// waiting.
    pub async fn start(&self) -> Result<(InstallReport, Option<ActivateReport>)> {
        let installed = self.install().await?;

        let may_activate = self.signals.skip_waiting.load(Ordering::SeqCst)
            || self.clients.read().await.is_empty();
        if !may_activate {
            info!("Installed worker is waiting for open clients to close");
            return Ok((installed, None));
        }

        let activated = self.activate().await?;
        Ok((installed, Some(activated)))
    }

    /// Dispatch one lifecycle event and await its handler
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        match event {
            LifecycleEvent::Install => self.install().await.map(EventOutcome::Installed),
            LifecycleEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            LifecycleEvent::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Fetched),
        }
    }

    async fn transition(
        &self,
        event: &'static str,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(OfflineError::InvalidState {
                event,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    async fn set_state(&self, to: WorkerState) {
        *self.state.write().await = to;
    }

    pub async fn install(&self) -> Result<InstallReport> {
        self.transition("install", WorkerState::Parsed, WorkerState::Installing)
            .await?;

        match self.handler.handle_install(&self.signals).await {
            Ok(report) => {
                self.set_state(WorkerState::Installed).await;
                Ok(report)
            }
            Err(e) => {
                error!(cache = %self.handler.cache_name(), error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    pub async fn activate(&self) -> Result<ActivateReport> {
        self.transition("activate", WorkerState::Installed, WorkerState::Activating)
            .await?;

        let report = self.handler.handle_activate(&self.signals).await;

        if self.signals.claim.load(Ordering::SeqCst) {
            let mut clients = self.clients.write().await;
            for controlled in clients.values_mut() {
                *controlled = true;
            }
            info!(clients = clients.len(), "Claimed open clients");
        }

        self.set_state(WorkerState::Activated).await;
        info!(
            cache = %self.handler.cache_name(),
            deleted = report.deleted.len(),
            "Worker activated"
        );
        Ok(report)
    }

    pub async fn fetch(&self, request: &RequestKey) -> Result<FetchOutcome> {
        let state = self.state().await;
        if state != WorkerState::Activated {
            return Err(OfflineError::InvalidState {
                event: "fetch",
                state,
            });
        }
        self.handler.handle_fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{keys, FakeNetwork};
    use generation_cache::{CacheStorage, MemoryCacheStorage};
    use std::sync::Arc;

    const ORIGIN: &str = "https://jukebox.example/";

    fn host(storage: &Arc<MemoryCacheStorage>, network: FakeNetwork) -> WorkerHost {
        let handler = CacheLifecycle::new(
            "jukebox-v62",
            keys(&["./index.html"]),
            storage.clone(),
            Arc::new(network),
        );
        WorkerHost::new(handler)
    }

    fn serving_index() -> FakeNetwork {
        FakeNetwork::serving(&[(format!("{}index.html", ORIGIN), 200, "<html>")])
    }

    #[tokio::test]
    async fn test_start_installs_and_activates() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("jukebox-v61").await.unwrap();
        let host = host(&storage, serving_index());
        assert_eq!(host.state().await, WorkerState::Parsed);

        let (installed, activated) = host.start().await.unwrap();
        assert_eq!(installed.cached.len(), 1);
        assert_eq!(activated.unwrap().deleted, vec!["jukebox-v61"]);
        assert_eq!(host.state().await, WorkerState::Activated);
        assert_eq!(storage.keys().await.unwrap(), vec!["jukebox-v62"]);
    }

    #[tokio::test]
    async fn test_failed_install_makes_worker_redundant() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("jukebox-v61").await.unwrap();
        let host = host(&storage, FakeNetwork::default());

        assert!(host.start().await.is_err());
        assert_eq!(host.state().await, WorkerState::Redundant);
        // previous generation is left alone
        assert_eq!(storage.keys().await.unwrap(), vec!["jukebox-v61"]);
    }

    #[tokio::test]
    async fn test_fetch_requires_activation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let host = host(&storage, serving_index());
        let request = keys(&["./index.html"])[0].clone();

        let result = host.dispatch(LifecycleEvent::Fetch(request.clone())).await;
        assert!(matches!(
            result,
            Err(OfflineError::InvalidState {
                state: WorkerState::Parsed,
                ..
            })
        ));

        host.dispatch(LifecycleEvent::Install).await.unwrap();
        host.dispatch(LifecycleEvent::Activate).await.unwrap();
        match host.dispatch(LifecycleEvent::Fetch(request)).await.unwrap() {
            EventOutcome::Fetched(outcome) => assert_eq!(outcome.response.body, b"<html>"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let host = host(&storage, serving_index());

        let result = host.dispatch(LifecycleEvent::Activate).await;
        assert!(matches!(
            result,
            Err(OfflineError::InvalidState {
                event: "activate",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_activation_claims_open_clients() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let host = host(&storage, serving_index());
        let first = host.register_client().await;
        let second = host.register_client().await;
        assert!(host.controlled_clients().await.is_empty());

        // skip_waiting lets the worker activate despite open clients
        let (_, activated) = host.start().await.unwrap();
        assert!(activated.is_some());
        assert_eq!(host.controlled_clients().await, vec![first, second]);
    }

    #[test]
    fn test_worker_state_display() {
        assert_eq!(WorkerState::Activated.to_string(), "activated");
        assert_eq!(
            serde_json::to_string(&WorkerState::Redundant).unwrap(),
            "\"redundant\""
        );
    }
}
