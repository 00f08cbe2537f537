//! Core types for the jukebox offline cache

use crate::error::{OfflineError, Result};
use crate::host::WorkerState;
use crate::lifecycle::InstallPolicy;
use generation_cache::{CacheStats, RequestKey};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Cache identifier for the current generation. Bump the version to force
/// clients onto fresh assets after a redeploy.
pub const CACHE_NAME: &str = "jukebox-v62-stats";

/// Assets pre-cached on install, relative to the scope URL
pub const ASSETS_TO_CACHE: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.json",
    "./assets/limit.mp3",
    "./assets/img/hintergrund.jpg",
    "./assets/icons/icon.png",
    "./assets/icons/icon512_maskable.png",
    "./assets/icons/icon512_rounded.png",
];

/// Where cache generations live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    File,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(OfflineError::Config(format!(
                "unknown CACHE_BACKEND: {}",
                other
            ))),
        }
    }
}

/// Configuration for the offline cache
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    pub port: u16,
    /// Scope URL that relative asset paths and proxied requests resolve against
    pub origin: Url,
    pub cache_name: String,
    pub assets: Vec<String>,
    pub cache_dir: PathBuf,
    pub backend: StorageBackend,
    pub install_policy: InstallPolicy,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            origin: default_origin(),
            cache_name: CACHE_NAME.to_string(),
            assets: ASSETS_TO_CACHE.iter().map(|s| s.to_string()).collect(),
            cache_dir: PathBuf::from("./cache/offline"),
            backend: StorageBackend::File,
            install_policy: InstallPolicy::AllOrNothing,
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8080/").expect("default origin is a valid URL")
}

impl OfflineConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let origin = match lookup("ORIGIN_URL") {
            Some(raw) => parse_origin(&raw)?,
            None => defaults.origin,
        };

        let cache_name = lookup("CACHE_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.cache_name);

        let assets = lookup("ASSETS")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.assets);

        let cache_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let backend = match lookup("CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.backend,
        };

        let install_policy = match lookup("INSTALL_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.install_policy,
        };

        Ok(Self {
            port,
            origin,
            cache_name,
            assets,
            cache_dir,
            backend,
            install_policy,
        })
    }

    /// Request identities of every asset, resolved against the origin
    pub fn asset_keys(&self) -> Result<Vec<RequestKey>> {
        self.assets
            .iter()
            .map(|asset| RequestKey::resolve(&self.origin, asset).map_err(OfflineError::from))
            .collect()
    }
}

/// Parse the origin, forcing a trailing slash so relative assets resolve
/// beneath it rather than next to it
fn parse_origin(raw: &str) -> Result<Url> {
    let mut origin = Url::parse(raw.trim())
        .map_err(|e| OfflineError::Config(format!("invalid ORIGIN_URL {}: {}", raw, e)))?;
    if !origin.path().ends_with('/') {
        let path = format!("{}/", origin.path());
        origin.set_path(&path);
    }
    Ok(origin)
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache_name: String,
    pub worker_state: WorkerState,
    pub cache: CacheStats,
}
