//! Error type for cache lifecycle operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SwError>;

/// Errors that can occur in cache lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwError {
    /// The request never produced a response (offline, DNS, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// A response arrived but cannot be stored (non-2xx where one is required).
    #[error("Bad response for {url}: status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SwError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transport failures and bad statuses are worth another install attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwError::Network(_) | SwError::BadStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(SwError::network("offline").is_retryable());
        assert!(SwError::BadStatus {
            url: "https://app.test/a.js".into(),
            status: 503
        }
        .is_retryable());
        assert!(!SwError::cache("quota").is_retryable());
        assert!(!SwError::manifest("bad").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SwError::BadStatus {
            url: "https://app.test/a.js".into(),
            status: 404,
        };
        assert_eq!(err.to_string(), "Bad response for https://app.test/a.js: status 404");
    }
}
