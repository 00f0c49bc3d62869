//! Lifecycle controller
//!
//! Drives the worker through its phases:
//!
//! - **install**: stage the core set with forced fetches
//! - **activate**: prune the durable region against the new manifest,
//!   commit the staged files, record the manifest as history
//! - **fetch**: route intercepted requests (see [`crate::router`])
//! - **message**: `skipWaiting` / `downloadOffline`
//!
//! The controller owns no global state; configuration, manifest, storage,
//! network and runtime hooks are all injected.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::control::ControlMessage;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::network::{Fetcher, Request, Response};
use crate::router::{canonical_url, logical_key, FetchOutcome, Router};
use crate::store::{Cache, CacheStorage};

/// Hooks into the hosting runtime.
pub trait WorkerScope: Send + Sync {
    /// Become the active candidate without waiting for old pages to close.
    fn skip_waiting(&self);

    /// Take control of every open page of the application.
    fn claim_clients(&self);
}

/// A scope that ignores both signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScope;

impl WorkerScope for NoopScope {
    fn skip_waiting(&self) {}
    fn claim_clients(&self) {}
}

/// One method per lifecycle event, called by the hosting runtime.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Install event. An error fails the installation.
    async fn install(&self) -> Result<()>;

    /// Activate event. Never fails: failures are recovered internally.
    async fn activate(&self) -> ActivationOutcome;

    /// Fetch event.
    async fn fetch(&self, request: &Request) -> Result<FetchOutcome>;

    /// Message event.
    async fn message(&self, data: &str) -> Result<()>;
}

/// How an activation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// No history: durable was rebuilt from staging.
    FirstInstall { installed: usize },
    /// History present: unchanged entries kept, stale ones pruned.
    Upgraded {
        retained: usize,
        pruned: usize,
        installed: usize,
    },
    /// Reconciliation failed and every region was deleted.
    Recovered { reason: String },
}

/// Lifecycle controller.
pub struct LifecycleController {
    config: WorkerConfig,
    manifest: Manifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    scope: Arc<dyn WorkerScope>,
}

impl LifecycleController {
    /// Create a controller with a scope that ignores runtime signals.
    pub fn new(
        config: WorkerConfig,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            manifest,
            storage,
            fetcher,
            scope: Arc::new(NoopScope),
        }
    }

    /// Attach the runtime hooks.
    pub fn with_scope(mut self, scope: Arc<dyn WorkerScope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Fetch every manifest resource missing from durable, all or nothing.
    ///
    /// Returns the number of resources added.
    #[instrument(skip(self))]
    pub async fn download_offline(&self) -> Result<usize> {
        let durable = self.storage.open(&self.config.regions.durable).await?;
        let origin = self.config.origin_str();

        let present: HashSet<String> = durable
            .keys()
            .await?
            .iter()
            .filter_map(|url| logical_key(&origin, url.as_str()))
            .collect();

        let missing: Vec<String> = self
            .manifest
            .paths()
            .filter(|path| !present.contains(*path))
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            debug!("Every resource already cached");
            return Ok(0);
        }

        info!(missing = missing.len(), "Downloading resources for offline use");
        let fetched = self.fetch_all(&missing).await?;
        let added = fetched.len();
        for (url, response) in fetched {
            durable.put(&url, response).await?;
        }
        Ok(added)
    }

    /// Forced fetch of every path; the first failure aborts the batch.
    async fn fetch_all(&self, paths: &[String]) -> Result<Vec<(Url, Response)>> {
        let fetches = paths.iter().map(|path| async move {
            let url = canonical_url(&self.config.origin, path)?;
            let response = self
                .fetcher
                .fetch(&Request::reload(url.clone()))
                .await?
                .require_ok(&url)?;
            Ok::<_, crate::SwError>((url, response))
        });
        try_join_all(fetches).await
    }

    /// Steps 1–4 of activation. Any error leaves the regions in an unknown state.
    async fn reconcile(&self) -> Result<ActivationOutcome> {
        let regions = &self.config.regions;

        let mut durable = self.storage.open(&regions.durable).await?;
        let staging = self.storage.open(&regions.staging).await?;
        let history = self.storage.open(&regions.history).await?;

        let history_url = self.config.history_url()?;
        let previous = history.match_url(&history_url).await?;

        let outcome = match previous {
            None => {
                // First activation on this client: start from an empty durable region.
                self.storage.delete(&regions.durable).await?;
                durable = self.storage.open(&regions.durable).await?;
                let installed = copy_entries(staging.as_ref(), durable.as_ref()).await?;
                ActivationOutcome::FirstInstall { installed }
            }
            Some(record) => {
                let committed = Manifest::parse_history(&record.body)?;
                let origin = self.config.origin_str();
                let (mut retained, mut pruned) = (0, 0);

                for url in durable.keys().await? {
                    let unchanged = logical_key(&origin, url.as_str()).is_some_and(|key| {
                        match (self.manifest.fingerprint(&key), committed.get(&key)) {
                            (Some(current), Some(previous)) => current == previous,
                            _ => false,
                        }
                    });

                    if unchanged {
                        retained += 1;
                    } else {
                        debug!(%url, "Pruning stale resource");
                        durable.delete(&url).await?;
                        pruned += 1;
                    }
                }

                // Pruning is complete; staged core files overwrite retained copies.
                let installed = copy_entries(staging.as_ref(), durable.as_ref()).await?;
                ActivationOutcome::Upgraded {
                    retained,
                    pruned,
                    installed,
                }
            }
        };

        self.storage.delete(&regions.staging).await?;

        let record = Response::ok(self.manifest.history_json())
            .with_header("content-type", "application/json");
        history.put(&history_url, record).await?;

        self.scope.claim_clients();
        Ok(outcome)
    }

    /// Delete all three regions, continuing past individual failures.
    async fn teardown(&self) {
        let regions = &self.config.regions;
        for name in [&regions.durable, &regions.staging, &regions.history] {
            if let Err(e) = self.storage.delete(name).await {
                error!(region = %name, error = %e, "Failed to delete cache region");
            }
        }
    }
}

#[async_trait]
impl LifecycleHandler for LifecycleController {
    #[instrument(skip(self))]
    async fn install(&self) -> Result<()> {
        let core = self.manifest.core();
        info!(core = core.len(), "Installing");
        self.scope.skip_waiting();

        let name = &self.config.regions.staging;
        // Leftovers of an earlier failed install must not look like staged files.
        self.storage.delete(name).await?;
        let staging = self.storage.open(name).await?;

        let fetched = self.fetch_all(core).await?;
        for (url, response) in fetched {
            staging.put(&url, response).await?;
        }

        debug!("Core resources staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn activate(&self) -> ActivationOutcome {
        match self.reconcile().await {
            Ok(outcome) => {
                info!(?outcome, "Activated");
                outcome
            }
            Err(e) => {
                error!(error = %e, "Failed to upgrade service worker, clearing caches");
                self.teardown().await;
                ActivationOutcome::Recovered {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        Router {
            config: &self.config,
            manifest: &self.manifest,
            storage: self.storage.as_ref(),
            fetcher: self.fetcher.as_ref(),
        }
        .handle(request)
        .await
    }

    async fn message(&self, data: &str) -> Result<()> {
        match ControlMessage::parse(data) {
            Some(ControlMessage::SkipWaiting) => {
                debug!("skipWaiting requested");
                self.scope.skip_waiting();
                Ok(())
            }
            Some(ControlMessage::DownloadOffline) => match self.download_offline().await {
                Ok(added) => {
                    info!(added, "Offline download complete");
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "Offline download failed");
                    Err(e)
                }
            },
            None => {
                debug!(data, "Ignoring unrecognized message");
                Ok(())
            }
        }
    }
}

/// Copy every entry of `from` into `to`. Returns the number copied.
async fn copy_entries(from: &dyn Cache, to: &dyn Cache) -> Result<usize> {
    let keys = from.keys().await?;
    let mut copied = 0;
    for url in keys {
        if let Some(response) = from.match_url(&url).await? {
            to.put(&url, response).await?;
            copied += 1;
        }
    }
    Ok(copied)
}
