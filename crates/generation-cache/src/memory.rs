//! In-memory cache generations

use crate::error::Result;
use crate::storage::CacheStorage;
use crate::types::{CacheStats, CachedResponse, RequestKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

struct Generation {
    name: String,
    entries: HashMap<RequestKey, CachedResponse>,
}

/// Cache storage held entirely in process memory
#[derive(Default)]
pub struct MemoryCacheStorage {
    /// Generations in creation order
    generations: RwLock<Vec<Generation>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        if generations.iter().any(|g| g.name == name) {
            return Ok(false);
        }
        generations.push(Generation {
            name: name.to_string(),
            entries: HashMap::new(),
        });
        debug!(cache = %name, "Created cache generation");
        Ok(true)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let generations = self.generations.read().await;
        Ok(generations.iter().any(|g| g.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let generations = self.generations.read().await;
        Ok(generations.iter().map(|g| g.name.clone()).collect())
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
        let found = if key.is_get() {
            let generations = self.generations.read().await;
            generations
                .iter()
                .find(|g| g.name == name)
                .and_then(|g| g.entries.get(key).cloned())
        } else {
            None
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<()> {
        let mut generations = self.generations.write().await;
        let index = match generations.iter().position(|g| g.name == name) {
            Some(index) => index,
            None => {
                generations.push(Generation {
                    name: name.to_string(),
                    entries: HashMap::new(),
                });
                generations.len() - 1
            }
        };

        let count = entries.len();
        generations[index].entries.extend(entries);
        debug!(cache = %name, count, "Stored responses");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != name);
        Ok(generations.len() != before)
    }

    async fn stats(&self) -> CacheStats {
        let generations = self.generations.read().await;
        CacheStats {
            generations: generations.len(),
            entries: generations.iter().map(|g| g.entries.len()).sum(),
            total_size: generations
                .iter()
                .flat_map(|g| g.entries.values())
                .map(|r| r.body.len() as u64)
                .sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
