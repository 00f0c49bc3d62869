//! # Shellcache Common
//!
//! Utilities shared by the shellcache crates.
//!
//! ## Features
//!
//! - Logging configuration and subscriber setup
//! - Retry with exponential backoff, and phase timeouts

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, Elapsed, RetryConfig};
