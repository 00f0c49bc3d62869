//! # Shellcache Net
//!
//! HTTP implementation of the worker's network boundary.
//!
//! [`HttpFetcher`] turns a worker [`Request`] into a `reqwest` request and
//! the reply into a worker [`Response`]. Transport problems (connection
//! refused, timeout, truncated body) become [`SwError::Network`]; HTTP error
//! statuses are returned as ordinary responses for the caller to judge.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use http::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shellcache_sw::{CacheMode, Fetcher, Request, Response, SwError};
use tracing::{debug, info, trace};

/// HTTP fetcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellcache/{}", env!("CARGO_PKG_VERSION")),
            timeout_ms: 30_000,
            max_redirects: 10,
        }
    }
}

/// Network fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher.
    pub fn new(config: &FetcherConfig) -> Result<Self, SwError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| SwError::config(format!("HTTP client: {e}")))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, SwError> {
        debug!(
            url = %request.url,
            method = %request.method,
            mode = ?request.cache_mode,
            "Fetching"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        if request.cache_mode == CacheMode::Reload {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let reply = builder
            .send()
            .await
            .map_err(|e| SwError::network(format!("{}: {e}", request.url)))?;

        let status = reply.status().as_u16();
        let headers: HashMap<String, String> = reply
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = reply
            .bytes()
            .await
            .map_err(|e| SwError::network(format!("{}: reading body: {e}", request.url)))?;

        trace!(url = %request.url, status, body_len = body.len(), "Response received");

        Ok(Response {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetcherConfig::default()).unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&server.uri()).unwrap().join(p).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = FetcherConfig::default();
        assert!(config.user_agent.starts_with("shellcache/"));
        assert_eq!(config.timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/main.dart.js"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("main();", "text/javascript"))
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::get(url(&server, "main.dart.js")))
            .await
            .unwrap();

        assert!(response.is_ok());
        assert!(!response.from_cache);
        assert_eq!(response.body.as_ref(), b"main();");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("text/javascript")
        );
    }

    #[tokio::test]
    async fn test_reload_sends_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .and(header("cache-control", "no-cache"))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::reload(url(&server, "index.html")))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::get(url(&server, "missing.png")))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let target = Url::parse(&format!("http://127.0.0.1:{port}/a.txt")).unwrap();

        let result = fetcher().fetch(&Request::get(target)).await;

        assert!(matches!(result, Err(SwError::Network(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let slow = HttpFetcher::new(&FetcherConfig {
            timeout_ms: 50,
            ..Default::default()
        })
        .unwrap();
        let result = slow.fetch(&Request::get(url(&server, "slow.js"))).await;

        assert!(matches!(result, Err(SwError::Network(_))));
    }
}
