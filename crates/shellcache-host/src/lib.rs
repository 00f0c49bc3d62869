//! # Shellcache Host
//!
//! Runtime adapter that hosts a shellcache worker the way a browser hosts a
//! service worker: registration slots, worker states, controlled pages and
//! event delivery.
//!
//! ```text
//! ServiceWorkerHost
//!   ├── Registration { installing, waiting, active }
//!   ├── Client pages ──controller──▶ WorkerId
//!   └── HostEvent channel (state / controller changes)
//! ```

pub mod config;
pub mod host;
pub mod registration;

pub use config::HostConfig;
pub use host::{Client, ClientId, HostError, HostEvent, HostScope, InstallReport, ServiceWorkerHost};
pub use registration::{Registration, WorkerId, WorkerRecord, WorkerState};
