//! Cache types

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Identity of a cacheable request: upper-cased method plus absolute URL
/// without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// A `GET` request for `url`
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// Parse an absolute URL into a request identity
    pub fn parse(method: &str, url: &str) -> Result<Self> {
        Ok(Self::new(method, &Url::parse(url)?))
    }

    /// Resolve a relative resource path (e.g. `./index.html`) against a
    /// scope URL into a `GET` request identity
    pub fn resolve(scope: &Url, path: &str) -> Result<Self> {
        Ok(Self::get(&scope.join(path)?))
    }

    /// Only `GET` requests are ever matched against a cache generation
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Stable hex digest of the identity, used for on-disk body names
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{} {}", self.method, self.url).as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Snapshot of a response as stored in a cache generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type")
            .unwrap_or("application/octet-stream")
    }
}

/// Index metadata for a response body stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub file: String,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the cache storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub generations: usize,
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.generations, 0);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_resolve_relative_assets() {
        let scope = Url::parse("https://jukebox.example/app/").unwrap();

        let root = RequestKey::resolve(&scope, "./").unwrap();
        assert_eq!(root.url, "https://jukebox.example/app/");
        assert_eq!(root.method, "GET");

        let icon = RequestKey::resolve(&scope, "./assets/icons/icon.png").unwrap();
        assert_eq!(icon.url, "https://jukebox.example/app/assets/icons/icon.png");
    }

    #[test]
    fn test_identity_ignores_fragment_and_method_case() {
        let a = RequestKey::parse("get", "https://jukebox.example/index.html#top").unwrap();
        let b = RequestKey::parse("GET", "https://jukebox.example/index.html").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert!(a.is_get());
    }

    #[test]
    fn test_digest_distinguishes_method() {
        let get = RequestKey::parse("GET", "https://jukebox.example/api").unwrap();
        let post = RequestKey::parse("POST", "https://jukebox.example/api").unwrap();
        assert_ne!(get.digest(), post.digest());
        assert_eq!(get.digest().len(), 64);
        assert!(!post.is_get());
    }

    #[test]
    fn test_parse_rejects_relative_url() {
        assert!(RequestKey::parse("GET", "./index.html").is_err());
    }

    #[test]
    fn test_cached_response_headers() {
        let response = CachedResponse::new(
            200,
            vec![("Content-Type".to_string(), "audio/mpeg".to_string())],
            b"ID3".to_vec(),
        );
        assert!(response.is_success());
        assert_eq!(response.content_type(), "audio/mpeg");
        assert_eq!(response.header("content-type"), Some("audio/mpeg"));

        let not_found = CachedResponse::new(404, vec![], vec![]);
        assert!(!not_found.is_success());
        assert_eq!(not_found.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_cache_entry_serialization() {
        let entry = CacheEntry {
            key: RequestKey::parse("GET", "https://jukebox.example/index.html").unwrap(),
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            file: "abc123-1".to_string(),
            size: 12345,
            stored_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("text/html"));
        assert!(json.contains("12345"));

        let deserialized: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.key, entry.key);
        assert_eq!(deserialized.size, entry.size);
    }
}
