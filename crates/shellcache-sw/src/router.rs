//! Request router
//!
//! Decides, per intercepted request, whether to let it through to the
//! network untouched, serve it cache-first, or (for the root document)
//! serve it online-first.

use std::borrow::Cow;

use http::Method;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{Result, SwError};
use crate::manifest::{Manifest, ROOT_KEY};
use crate::network::{Fetcher, Request, Response};
use crate::store::CacheStorage;

/// Cache-busting query marker; it and everything after it are ignored.
const VERSION_QUERY: &str = "?v=";

/// What the worker does with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted: the request goes to the network as usual.
    Bypass,
    /// Answered by the worker.
    Respond(Response),
}

/// Logical cache key for a URL, or `None` when the URL is outside `origin`.
///
/// `origin` is the serialized origin without a trailing slash. The bare
/// origin, `origin/`, and `origin/#...` all map to `/`.
pub fn logical_key(origin: &str, url: &str) -> Option<String> {
    if url == origin {
        return Some(ROOT_KEY.to_string());
    }

    let rest = url.strip_prefix(origin)?.strip_prefix('/')?;
    if rest.starts_with('#') {
        return Some(ROOT_KEY.to_string());
    }

    let key = match rest.find(VERSION_QUERY) {
        Some(end) => &rest[..end],
        None => rest,
    };
    if key.is_empty() {
        return Some(ROOT_KEY.to_string());
    }

    let decoded = urlencoding::decode(key).unwrap_or(Cow::Borrowed(key));
    Some(decoded.into_owned())
}

/// URL under which the entry for `key` is stored.
pub fn canonical_url(origin: &Url, key: &str) -> Result<Url> {
    if key == ROOT_KEY {
        return Ok(origin.clone());
    }
    origin
        .join(key)
        .map_err(|e| SwError::cache(format!("resource path {key}: {e}")))
}

/// Fetch-time policy over one worker's manifest, durable region and network.
pub struct Router<'a> {
    pub config: &'a WorkerConfig,
    pub manifest: &'a Manifest,
    pub storage: &'a dyn CacheStorage,
    pub fetcher: &'a dyn Fetcher,
}

impl Router<'_> {
    /// Handle one intercepted request.
    pub async fn handle(&self, request: &Request) -> Result<FetchOutcome> {
        if request.method != Method::GET {
            trace!(method = %request.method, url = %request.url, "Not a GET, bypassing");
            return Ok(FetchOutcome::Bypass);
        }

        let Some(key) = logical_key(&self.config.origin_str(), request.url.as_str()) else {
            trace!(url = %request.url, "Outside origin, bypassing");
            return Ok(FetchOutcome::Bypass);
        };

        if !self.manifest.contains(&key) {
            trace!(%key, "Not a managed resource, bypassing");
            return Ok(FetchOutcome::Bypass);
        }

        let response = if key == ROOT_KEY {
            self.online_first(request).await?
        } else {
            self.cache_first(&key, request).await?
        };
        Ok(FetchOutcome::Respond(response))
    }

    /// Serve from durable; on a miss fetch, and keep the copy only if it is 2xx.
    async fn cache_first(&self, key: &str, request: &Request) -> Result<Response> {
        let durable = self.storage.open(&self.config.regions.durable).await?;
        let url = canonical_url(&self.config.origin, key)?;

        if let Some(cached) = durable.match_url(&url).await? {
            debug!(%key, "Cache hit");
            return Ok(cached);
        }

        debug!(%key, "Cache miss, fetching");
        let response = self.fetcher.fetch(request).await?;
        if response.is_ok() {
            if let Err(e) = durable.put(&url, response.clone()).await {
                warn!(%key, error = %e, "Failed to cache fetched resource");
            }
        } else {
            debug!(%key, status = response.status, "Not caching unsuccessful response");
        }
        Ok(response)
    }

    /// Network first for the root document, falling back to the cached copy.
    async fn online_first(&self, request: &Request) -> Result<Response> {
        let url = self.config.origin.clone();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    let durable = self.storage.open(&self.config.regions.durable).await?;
                    if let Err(e) = durable.put(&url, response.clone()).await {
                        warn!(error = %e, "Failed to cache root document");
                    }
                } else {
                    debug!(status = response.status, "Not caching unsuccessful root document");
                }
                Ok(response)
            }
            Err(network_error) => {
                debug!(error = %network_error, "Root fetch failed, trying cache");
                let durable = self.storage.open(&self.config.regions.durable).await?;
                match durable.match_url(&url).await? {
                    Some(cached) => Ok(cached),
                    None => Err(network_error),
                }
            }
        }
    }
}
