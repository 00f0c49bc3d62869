//! Cache store adapter
//!
//! Named cache regions holding URL → response entries. The traits mirror a
//! browser's `CacheStorage`/`Cache` pair: every call is asynchronous and can
//! fail. [`MemoryCacheStorage`] is the in-process implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{Result, SwError};
use crate::network::Response;

/// A single named cache region.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up the response stored for a URL.
    async fn match_url(&self, url: &Url) -> Result<Option<Response>>;

    /// Store a response, replacing any previous entry for the URL.
    async fn put(&self, url: &Url, response: Response) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, url: &Url) -> Result<bool>;

    /// URLs of all entries.
    async fn keys(&self) -> Result<Vec<Url>>;
}

/// The set of named regions.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a region, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Check if a region exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a region and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of all regions.
    async fn keys(&self) -> Result<Vec<String>>;
}

// ==================== In-memory implementation ====================

/// A stored response.
#[derive(Debug, Clone)]
struct CacheEntry {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl CacheEntry {
    fn from_response(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }

    fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            from_cache: true,
        }
    }
}

/// In-memory cache region.
#[derive(Debug, Default)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn match_url(&self, url: &Url) -> Result<Option<Response>> {
        Ok(self
            .entries
            .read()
            .await
            .get(url.as_str())
            .map(CacheEntry::to_response))
    }

    async fn put(&self, url: &Url, response: Response) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(url.to_string(), CacheEntry::from_response(response));
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<bool> {
        Ok(self.entries.write().await.remove(url.as_str()).is_some())
    }

    async fn keys(&self) -> Result<Vec<Url>> {
        let entries = self.entries.read().await;
        let mut keys = entries
            .keys()
            .map(|k| Url::parse(k).map_err(|e| SwError::cache(format!("stored key {k}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        keys.sort();
        Ok(keys)
    }
}

/// In-memory cache storage.
///
/// Cloning returns another handle to the same regions, so the storage can
/// outlive any one worker instance.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Arc<MemoryCache>>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a region and keep the concrete type, for inspection.
    pub async fn open_memory(&self, name: &str) -> Arc<MemoryCache> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)))
            .clone()
    }

    /// Existing region, without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let cache: Arc<dyn Cache> = self.open_memory(name).await;
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
