//! Jukebox offline cache library
//!
//! Pre-caches the jukebox web app's assets into a versioned cache
//! generation, serves requests cache-first with network fallback, and purges
//! generations left behind by earlier versions.

pub mod error;
pub mod host;
pub mod lifecycle;
pub mod network;
pub mod server;
pub mod types;

pub use error::{OfflineError, Result};
pub use host::{ClientId, EventOutcome, LifecycleEvent, WorkerHost, WorkerState};
pub use lifecycle::{
    ActivateReport, CacheLifecycle, FetchOutcome, FetchSource, HostSignals, InstallPolicy,
    InstallReport,
};
pub use network::{HttpNetwork, Network};
pub use server::{create_router, start_server, ServerState, SharedState};
pub use types::{OfflineConfig, StorageBackend, ASSETS_TO_CACHE, CACHE_NAME};
