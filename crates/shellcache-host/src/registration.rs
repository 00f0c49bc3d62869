//! Worker registration state.
//!
//! A registration holds up to three workers: the one installing, the one
//! installed and waiting, and the active one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a hosted worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate event running.
    Activating,
    /// Active; may control pages.
    Activated,
    /// Replaced or failed to install.
    Redundant,
}

/// A hosted worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,

    /// Script the worker was registered from.
    pub script_url: Url,

    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl WorkerRecord {
    pub fn new(script_url: Url) -> Self {
        Self {
            id: WorkerId::new(),
            script_url,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// The installing / waiting / active slots.
#[derive(Debug, Default)]
pub struct Registration {
    pub installing: Option<WorkerRecord>,
    pub waiting: Option<WorkerRecord>,
    pub active: Option<WorkerRecord>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a worker in any slot.
    pub fn get(&self, id: WorkerId) -> Option<&WorkerRecord> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// The newest worker: waiting if there is one, otherwise active.
    pub fn newest(&self) -> Option<&WorkerRecord> {
        self.waiting.as_ref().or(self.active.as_ref())
    }

    pub fn active_id(&self) -> Option<WorkerId> {
        self.active.as_ref().map(|w| w.id)
    }

    /// Ids of every worker still held by the registration.
    pub fn live_ids(&self) -> Vec<WorkerId> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .map(|w| w.id)
            .collect()
    }
}
