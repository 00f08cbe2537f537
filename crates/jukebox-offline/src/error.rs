//! Error types for the jukebox offline cache

use crate::host::WorkerState;
use std::fmt;

#[derive(Debug)]
pub enum OfflineError {
    Cache(generation_cache::CacheError),
    Http(Box<reqwest::Error>),
    /// Network unreachable for a non-HTTP reason
    Network(String),
    /// An asset answered with a non-success status during install
    AssetStatus {
        url: String,
        status: u16,
    },
    Install(String),
    InvalidState {
        event: &'static str,
        state: WorkerState,
    },
    /// A proxied request that does not resolve inside the scope URL
    InvalidRequest(String),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for OfflineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineError::Cache(err) => write!(f, "Cache error: {}", err),
            OfflineError::Http(err) => write!(f, "HTTP error: {}", err),
            OfflineError::Network(msg) => write!(f, "Network error: {}", msg),
            OfflineError::AssetStatus { url, status } => {
                write!(f, "Asset {} returned status {}", url, status)
            }
            OfflineError::Install(msg) => write!(f, "Install failed: {}", msg),
            OfflineError::InvalidState { event, state } => {
                write!(f, "Cannot handle {} while worker is {}", event, state)
            }
            OfflineError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            OfflineError::Io(err) => write!(f, "IO error: {}", err),
            OfflineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for OfflineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OfflineError::Cache(err) => Some(err),
            OfflineError::Http(err) => Some(err.as_ref()),
            OfflineError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<generation_cache::CacheError> for OfflineError {
    fn from(err: generation_cache::CacheError) -> Self {
        OfflineError::Cache(err)
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        OfflineError::Http(Box::new(err))
    }
}

impl From<std::io::Error> for OfflineError {
    fn from(err: std::io::Error) -> Self {
        OfflineError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for OfflineError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        OfflineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;
