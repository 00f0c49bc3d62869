//! Worker configuration
//!
//! Everything the controller would otherwise read from module-level
//! constants: the origin it serves and the names of its three cache regions.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SwError};

/// Names of the three cache regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheRegions {
    /// Ephemeral region filled during install.
    pub staging: String,

    /// Long-lived region serving intercepted requests.
    pub durable: String,

    /// Single-record region holding the last committed manifest.
    pub history: String,
}

impl Default for CacheRegions {
    fn default() -> Self {
        Self {
            staging: "flutter-temp-cache".to_string(),
            durable: "flutter-app-cache".to_string(),
            history: "flutter-app-manifest".to_string(),
        }
    }
}

impl CacheRegions {
    fn validate(&self) -> Result<()> {
        let names = [&self.staging, &self.durable, &self.history];
        if names.iter().any(|n| n.is_empty()) {
            return Err(SwError::config("cache region names must not be empty"));
        }
        if self.staging == self.durable
            || self.staging == self.history
            || self.durable == self.history
        {
            return Err(SwError::config("cache region names must be distinct"));
        }
        Ok(())
    }
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered for; only its path-relative URLs are managed.
    pub origin: Url,

    /// Region names.
    pub regions: CacheRegions,

    /// Key of the history record inside the history region.
    pub history_key: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost/").expect("static URL is valid"),
            regions: CacheRegions::default(),
            history_key: "manifest".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Default configuration for the given origin.
    pub fn for_origin(origin: &str) -> Result<Self> {
        let config = Self {
            origin: parse_origin(origin)?,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| SwError::config(e.to_string()))?;
        config.origin = parse_origin(config.origin.as_str())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Serialized origin without a trailing slash, e.g. `https://app.test`.
    pub fn origin_str(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// URL under which the history record is stored.
    pub fn history_url(&self) -> Result<Url> {
        self.origin
            .join(&self.history_key)
            .map_err(|e| SwError::config(format!("history key: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_key.is_empty() {
            return Err(SwError::config("history key must not be empty"));
        }
        self.regions.validate()
    }
}

/// Reduce a URL to its origin root (`scheme://host[:port]/`).
fn parse_origin(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| SwError::config(format!("origin {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(SwError::config(format!(
            "origin must be an http(s) URL with a host: {raw}"
        )));
    }
    Url::parse(&format!("{}/", url.origin().ascii_serialization()))
        .map_err(|e| SwError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.regions.durable, "flutter-app-cache");
        assert_eq!(config.history_key, "manifest");
        assert_eq!(config.origin_str(), "http://localhost");
    }

    #[test]
    fn test_origin_is_normalized() {
        let config = WorkerConfig::for_origin("https://app.test/some/page?x=1").unwrap();
        assert_eq!(config.origin.as_str(), "https://app.test/");
        assert_eq!(config.origin_str(), "https://app.test");
        assert_eq!(
            config.history_url().unwrap().as_str(),
            "https://app.test/manifest"
        );
    }

    #[test]
    fn test_rejects_non_http_origin() {
        assert!(WorkerConfig::for_origin("file:///tmp/app").is_err());
        assert!(WorkerConfig::for_origin("not a url").is_err());
    }

    #[test]
    fn test_partial_json() {
        let config = WorkerConfig::from_json(
            r#"{"origin": "https://app.test:8443", "regions": {"durable": "v2-cache"}}"#,
        )
        .unwrap();
        assert_eq!(config.origin_str(), "https://app.test:8443");
        assert_eq!(config.regions.durable, "v2-cache");
        assert_eq!(config.regions.staging, "flutter-temp-cache");
    }

    #[test]
    fn test_duplicate_region_names_rejected() {
        let err = WorkerConfig::from_json(
            r#"{"regions": {"staging": "same", "durable": "same"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SwError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"origin": "https://files.test", "history_key": "last"}}"#).unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.history_url().unwrap().as_str(), "https://files.test/last");
    }
}
