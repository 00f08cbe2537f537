//! File-based cache generations with in-memory index

use crate::error::Result;
use crate::storage::CacheStorage;
use crate::types::{CacheEntry, CacheStats, CachedResponse, RequestKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.json";

/// On-disk index of one generation, keyed by request digest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerationIndex {
    name: String,
    created_at: DateTime<Utc>,
    entries: BTreeMap<String, CacheEntry>,
}

impl GenerationIndex {
    fn size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

/// Cache generations stored as one directory each under a root directory.
///
/// Every generation directory holds the response bodies plus an
/// `index.json`. The index is replaced via rename, so a `put_all` batch is
/// either fully visible or not at all.
pub struct FileCacheStorage {
    /// Root directory holding one subdirectory per generation
    root: PathBuf,
    /// In-memory copy of every generation index, oldest first
    generations: RwLock<Vec<GenerationIndex>>,
    /// Total size of stored bodies
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileCacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            generations: RwLock::new(Vec::new()),
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Ensure the root directory exists and load every generation index
    /// found under it
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let mut loaded = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let index_path = entry.path().join(INDEX_FILE);
            match read_index(&index_path).await {
                Ok(index) => loaded.push(index),
                Err(e) => {
                    warn!(path = ?index_path, error = %e, "Skipping cache directory without readable index")
                }
            }
        }
        loaded.sort_by_key(|g| g.created_at);

        let total_size = loaded.iter().map(GenerationIndex::size).sum();
        self.current_size.store(total_size, Ordering::Relaxed);
        info!(root = ?self.root, generations = loaded.len(), total_size, "Cache storage initialized");

        *self.generations.write().await = loaded;
        Ok(())
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        self.root.join(hex::encode(hasher.finalize()))
    }

    async fn write_index(&self, index: &GenerationIndex) -> Result<()> {
        let dir = self.generation_dir(&index.name);
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, serde_json::to_vec(index)?).await?;
        fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }

    async fn create_generation(&self, name: &str) -> Result<GenerationIndex> {
        fs::create_dir_all(self.generation_dir(name)).await?;
        let index = GenerationIndex {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        };
        self.write_index(&index).await?;
        debug!(cache = %name, "Created cache generation");
        Ok(index)
    }

    async fn remove_files(dir: &Path, files: &[String]) {
        for file in files {
            let _ = fs::remove_file(dir.join(file)).await;
        }
    }
}

async fn read_index(path: &Path) -> Result<GenerationIndex> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn open(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        if generations.iter().any(|g| g.name == name) {
            return Ok(false);
        }
        let index = self.create_generation(name).await?;
        generations.push(index);
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
        let entry = if key.is_get() {
            let generations = self.generations.read().await;
            generations
                .iter()
                .find(|g| g.name == name)
                .and_then(|g| g.entries.get(&key.digest()).cloned())
        } else {
            None
        };

        if let Some(entry) = entry {
            let path = self.generation_dir(name).join(&entry.file);
            match fs::read(&path).await {
                Ok(body) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(cache = %name, request = %key, "Cache hit");
                    return Ok(Some(CachedResponse {
                        status: entry.status,
                        headers: entry.headers,
                        body,
                        stored_at: entry.stored_at,
                    }));
                }
                Err(e) => {
                    warn!(cache = %name, request = %key, error = %e, "Failed to read cached body");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<()> {
        let mut generations = self.generations.write().await;
        let position = match generations.iter().position(|g| g.name == name) {
            Some(position) => position,
            None => {
                let index = self.create_generation(name).await?;
                generations.push(index);
                generations.len() - 1
            }
        };

        let dir = self.generation_dir(name);
        let batch = Utc::now().timestamp_micros();
        let mut next = generations[position].clone();
        let mut written = Vec::new();

        for (key, response) in entries {
            let digest = key.digest();
            let file = format!("{}-{}", digest, batch);
            if let Err(e) = fs::write(dir.join(&file), &response.body).await {
                Self::remove_files(&dir, &written).await;
                return Err(e.into());
            }
            written.push(file.clone());

            next.entries.insert(
                digest,
                CacheEntry {
                    key,
                    status: response.status,
                    headers: response.headers,
                    file,
                    size: response.body.len() as u64,
                    stored_at: response.stored_at,
                },
            );
        }

        if let Err(e) = self.write_index(&next).await {
            Self::remove_files(&dir, &written).await;
            return Err(e);
        }

        let previous = std::mem::replace(&mut generations[position], next);
        let replaced: Vec<String> = previous
            .entries
            .into_values()
            .filter(|old| {
                generations[position]
                    .entries
                    .values()
                    .all(|e| e.file != old.file)
            })
            .map(|old| old.file)
            .collect();
        Self::remove_files(&dir, &replaced).await;

        let total_size = generations.iter().map(GenerationIndex::size).sum();
        self.current_size.store(total_size, Ordering::Relaxed);
        debug!(cache = %name, count = written.len(), "Stored responses");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let Some(position) = generations.iter().position(|g| g.name == name) else {
            return Ok(false);
        };

        // the index only forgets a generation once its directory is gone
        match fs::remove_dir_all(self.generation_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let removed = generations.remove(position);
        self.current_size.fetch_sub(removed.size(), Ordering::Relaxed);
        debug!(cache = %name, "Deleted cache generation");
        Ok(true)
    }

    async fn stats(&self) -> CacheStats {
        let generations = self.generations.read().await;
        CacheStats {
            generations: generations.len(),
            entries: generations.iter().map(|g| g.entries.len()).sum(),
            total_size: self.current_size.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(path: &str) -> RequestKey {
        RequestKey::parse("GET", &format!("https://jukebox.example/{}", path)).unwrap()
    }

    fn html(body: &str) -> CachedResponse {
        CachedResponse::new(
            200,
            vec![("content-type".to_string(), "text/html".to_string())],
            body.as_bytes().to_vec(),
        )
    }

    async fn storage(root: &Path) -> FileCacheStorage {
        let storage = FileCacheStorage::new(root.to_path_buf());
        storage.init().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_put_all_and_get() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .put_all("jukebox-v62", vec![(key("index.html"), html("<html>"))])
            .await
            .unwrap();

        let cached = storage
            .get("jukebox-v62", &key("index.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.status, 200);
        assert_eq!(cached.body, b"<html>");
        assert_eq!(cached.content_type(), "text/html");
    }

    #[tokio::test]
    async fn test_miss_on_unknown_generation_and_key() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage.open("v1").await.unwrap();

        assert!(storage.get("v1", &key("nope")).await.unwrap().is_none());
        assert!(storage.get("v2", &key("nope")).await.unwrap().is_none());
        assert_eq!(storage.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_index_survives_reload() {
        let dir = tempdir().unwrap();
        {
            let storage = storage(dir.path()).await;
            storage.open("jukebox-v61").await.unwrap();
            storage
                .put_all("jukebox-v62", vec![(key("index.html"), html("v62"))])
                .await
                .unwrap();
        }

        let reloaded = storage(dir.path()).await;
        assert_eq!(
            reloaded.keys().await.unwrap(),
            vec!["jukebox-v61", "jukebox-v62"]
        );
        let cached = reloaded
            .get("jukebox-v62", &key("index.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, b"v62");
        assert_eq!(reloaded.stats().await.total_size, 3);
    }

    #[tokio::test]
    async fn test_replacing_entry_keeps_latest_body() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .put_all("v1", vec![(key("index.html"), html("old"))])
            .await
            .unwrap();
        storage
            .put_all("v1", vec![(key("index.html"), html("newer"))])
            .await
            .unwrap();

        let cached = storage.get("v1", &key("index.html")).await.unwrap().unwrap();
        assert_eq!(cached.body, b"newer");

        let stats = storage.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 5);

        // index.json plus a single body file
        let files = std::fs::read_dir(storage.generation_dir("v1")).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_directory() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage
            .put_all("jukebox-v61", vec![(key("index.html"), html("old"))])
            .await
            .unwrap();
        let generation_dir = storage.generation_dir("jukebox-v61");
        assert!(generation_dir.exists());

        assert!(storage.delete("jukebox-v61").await.unwrap());
        assert!(!generation_dir.exists());
        assert!(!storage.has("jukebox-v61").await.unwrap());
        assert!(!storage.delete("jukebox-v61").await.unwrap());
        assert_eq!(storage.stats().await.total_size, 0);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_generation_listed() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage
            .put_all("jukebox-v61", vec![(key("index.html"), html("old"))])
            .await
            .unwrap();

        // a plain file where the generation directory should be
        let generation_dir = storage.generation_dir("jukebox-v61");
        std::fs::remove_dir_all(&generation_dir).unwrap();
        std::fs::write(&generation_dir, b"x").unwrap();

        assert!(storage.delete("jukebox-v61").await.is_err());
        assert!(storage.has("jukebox-v61").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["jukebox-v61"]);
        assert_eq!(storage.stats().await.total_size, 3);
    }

    #[tokio::test]
    async fn test_duplicate_key_in_batch_stores_one_body() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .put_all(
                "v1",
                vec![
                    (key("index.html"), html("first")),
                    (key("index.html"), html("second")),
                ],
            )
            .await
            .unwrap();

        let cached = storage.get("v1", &key("index.html")).await.unwrap().unwrap();
        assert_eq!(cached.body, b"second");
        assert_eq!(storage.stats().await.entries, 1);

        let files = std::fs::read_dir(storage.generation_dir("v1")).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_init_skips_directories_without_index() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("stray")).unwrap();
        std::fs::write(dir.path().join("stray").join(INDEX_FILE), b"not json").unwrap();

        let storage = storage(dir.path()).await;
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
