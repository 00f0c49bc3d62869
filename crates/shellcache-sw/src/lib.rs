//! # Shellcache Service Worker
//!
//! Manifest-driven offline cache for a web application shell.
//!
//! ## Features
//!
//! - **Install**: stage the core resources with forced fetches
//! - **Activate**: reconcile staged and previously cached resources against
//!   the new manifest, keeping unchanged files without re-fetching them
//! - **Fetch**: cache-first for managed resources, online-first for `/`
//! - **Messages**: `skipWaiting` and `downloadOffline` control commands
//!
//! ## Architecture
//!
//! ```text
//! LifecycleController (LifecycleHandler)
//!     │
//!     ├── Manifest (path → fingerprint, core set)
//!     ├── WorkerConfig (origin, region names)
//!     ├── CacheStorage
//!     │       ├── staging  (one install → activate cycle)
//!     │       ├── durable  (serves intercepted requests)
//!     │       └── history  (last committed manifest)
//!     ├── Fetcher (network)
//!     └── WorkerScope (skip_waiting, claim_clients)
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod network;
pub mod router;
pub mod store;

pub use config::{CacheRegions, WorkerConfig};
pub use control::ControlMessage;
pub use error::{Result, SwError};
pub use lifecycle::{
    ActivationOutcome, LifecycleController, LifecycleHandler, NoopScope, WorkerScope,
};
pub use manifest::Manifest;
pub use network::{CacheMode, Fetcher, Request, Response};
pub use router::{canonical_url, logical_key, FetchOutcome};
pub use store::{Cache, CacheStorage, MemoryCacheStorage};
