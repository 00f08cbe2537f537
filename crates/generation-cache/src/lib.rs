//! Versioned request/response cache generations
//!
//! A cache generation is a named mapping from request identity
//! (method + URL) to a stored response snapshot. Generations are created,
//! read and deleted wholesale through the [`CacheStorage`] capability, which
//! has an in-memory implementation for tests and embedding, and a
//! file-backed implementation with in-memory index tracking.

mod error;
mod file;
mod memory;
mod storage;
mod types;

pub use error::{CacheError, Result};
pub use file::FileCacheStorage;
pub use memory::MemoryCacheStorage;
pub use storage::CacheStorage;
pub use types::{CacheEntry, CacheStats, CachedResponse, RequestKey};
