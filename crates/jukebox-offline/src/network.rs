//! Network access for cache misses and install-time asset fetches

use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use generation_cache::{CachedResponse, RequestKey};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

/// Something that can turn a request into a response over the network
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &RequestKey) -> Result<CachedResponse>;
}

/// HTTP client backed network
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Create a network client with the default 30 second timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &RequestKey) -> Result<CachedResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            OfflineError::Network(format!("unsupported method: {}", request.method))
        })?;

        debug!(request = %request, "Fetching from network");
        let response = self.client.request(method, &request.url).send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(request = %request, status, size = body.len(), "Fetched from network");
        Ok(CachedResponse::new(status, headers, body))
    }
}
