//! The cache storage capability

use crate::error::Result;
use crate::types::{CacheStats, CachedResponse, RequestKey};
use async_trait::async_trait;

/// Named cache generations, each mapping request identity to a stored
/// response snapshot.
///
/// Implementations serialise conflicting operations internally; callers
/// never lock around them.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the generation if absent. Returns `true` when it was created
    /// by this call.
    async fn open(&self, name: &str) -> Result<bool>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all existing generations, oldest first
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look up a request in one generation. Unknown generations and
    /// non-`GET` requests never match.
    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

    /// Store a batch of responses, creating the generation if absent. The
    /// batch becomes visible at once or not at all.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, CachedResponse)>)
        -> Result<()>;

    /// Delete a whole generation. Returns `false` when it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn stats(&self) -> CacheStats;
}
