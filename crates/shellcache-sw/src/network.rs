//! Request/response model and the network boundary.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use url::Url;

use crate::error::{Result, SwError};

/// How the request may use intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP cache semantics.
    #[default]
    Default,
    /// Forced fetch: go to the network, ignoring any HTTP cache.
    Reload,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub cache_mode: CacheMode,
}

impl Request {
    /// A plain GET.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            cache_mode: CacheMode::Default,
        }
    }

    /// A GET that bypasses HTTP caches.
    pub fn reload(url: Url) -> Self {
        Self {
            cache_mode: CacheMode::Reload,
            ..Self::get(url)
        }
    }

    /// Parse a URL and build a GET.
    pub fn parse(url: &str) -> Result<Self> {
        Url::parse(url)
            .map(Self::get)
            .map_err(|e| SwError::network(format!("invalid URL {url}: {e}")))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// A response. Cloning shares the body buffer, so a response can be both
/// stored and returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,

    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Whether this copy was served from a cache region.
    pub from_cache: bool,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// 200 with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// A 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with [`SwError::BadStatus`] unless the status is 2xx.
    pub fn require_ok(self, url: &Url) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(SwError::BadStatus {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// The network.
///
/// A transport failure is `Err(SwError::Network)`; an HTTP error status is
/// still `Ok` and is judged by the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_request() {
        let request = Request::reload(Url::parse("https://app.test/main.dart.js").unwrap());
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.cache_mode, CacheMode::Reload);
    }

    #[test]
    fn test_response_status() {
        assert!(Response::ok("x").is_ok());
        assert!(Response::new(204, "").is_ok());
        assert!(!Response::new(304, "").is_ok());
        assert!(!Response::new(500, "").is_ok());
    }

    #[test]
    fn test_require_ok() {
        let url = Url::parse("https://app.test/a.txt").unwrap();
        assert!(Response::ok("a").require_ok(&url).is_ok());
        assert_eq!(
            Response::new(404, "").require_ok(&url),
            Err(SwError::BadStatus {
                url: url.to_string(),
                status: 404
            })
        );
    }

    #[test]
    fn test_clone_shares_body() {
        let response = Response::ok(vec![1u8; 64]).with_header("Content-Type", "text/plain");
        let copy = response.clone();
        assert_eq!(copy.body.as_ptr(), response.body.as_ptr());
        assert_eq!(copy.headers.get("content-type").map(String::as_str), Some("text/plain"));
    }
}
