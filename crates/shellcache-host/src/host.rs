//! Hosting runtime.
//!
//! [`ServiceWorkerHost`] plays the part of the browser around a worker: it
//! delivers lifecycle events to the worker's [`LifecycleHandler`], moves the
//! worker through its states, tracks which worker controls which page, and
//! applies the worker's `skip_waiting` / `claim_clients` requests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use shellcache_common::{retry_with_backoff, with_timeout, Elapsed};
use shellcache_sw::{
    ActivationOutcome, FetchOutcome, LifecycleHandler, Request, SwError, WorkerScope,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HostConfig;
use crate::registration::{Registration, WorkerId, WorkerRecord, WorkerState};

/// Errors surfaced by the host.
#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Worker(#[from] SwError),

    #[error("install {0}")]
    InstallTimeout(#[from] Elapsed),

    #[error("State error: {0}")]
    State(String),
}

impl HostError {
    fn is_retryable(&self) -> bool {
        match self {
            HostError::Worker(e) => e.is_retryable(),
            HostError::InstallTimeout(_) => true,
            HostError::State(_) => false,
        }
    }
}

/// Runtime signals raised by one worker, applied by the host after each event.
#[derive(Debug, Default)]
pub struct HostScope {
    skip_waiting: AtomicBool,
    claim: AtomicBool,
}

impl HostScope {
    fn take_skip_waiting(&self) -> bool {
        self.skip_waiting.swap(false, Ordering::SeqCst)
    }

    fn take_claim(&self) -> bool {
        self.claim.swap(false, Ordering::SeqCst)
    }
}

impl WorkerScope for HostScope {
    fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    fn claim_clients(&self) {
        self.claim.store(true, Ordering::SeqCst);
    }
}

/// Identifier of an open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// An open page of the application.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker whose fetch handler sees this page's requests.
    pub controller: Option<WorkerId>,
}

/// Host events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A worker changed state.
    StateChange { worker: WorkerId, state: WorkerState },
    /// A page got a new controller.
    ControllerChange { client: ClientId, worker: WorkerId },
}

/// Result of [`ServiceWorkerHost::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub worker: WorkerId,
    /// Set when the worker went on to activate immediately.
    pub activation: Option<ActivationOutcome>,
}

struct HostedWorker {
    handler: Arc<dyn LifecycleHandler>,
    scope: Arc<HostScope>,
}

/// Service worker host.
pub struct ServiceWorkerHost {
    config: HostConfig,
    registration: Registration,
    workers: HashMap<WorkerId, HostedWorker>,
    clients: HashMap<ClientId, Client>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl ServiceWorkerHost {
    /// Create a host and the receiver for its events.
    pub fn new(config: HostConfig) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                registration: Registration::new(),
                workers: HashMap::new(),
                clients: HashMap::new(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Register and install a new worker.
    ///
    /// `build` receives the scope the worker must report its runtime signals
    /// to. A failed install is retried per `HostConfig::install_retry`, each
    /// attempt bounded by `install_timeout_ms`; when all attempts fail the
    /// worker becomes redundant and the last error is returned.
    pub async fn install<F>(
        &mut self,
        script_url: Url,
        build: F,
    ) -> Result<InstallReport, HostError>
    where
        F: FnOnce(Arc<dyn WorkerScope>) -> Arc<dyn LifecycleHandler>,
    {
        let scope = Arc::new(HostScope::default());
        let signals: Arc<dyn WorkerScope> = scope.clone();
        let handler = build(signals);

        let mut record = WorkerRecord::new(script_url);
        let id = record.id;
        info!(worker = id.raw(), script = %record.script_url, "Installing worker");
        record.set_state(WorkerState::Installing);
        self.emit(HostEvent::StateChange {
            worker: id,
            state: WorkerState::Installing,
        });
        self.registration.installing = Some(record);

        let timeout = self.config.install_timeout();
        let result = retry_with_backoff(
            &self.config.install_retry,
            HostError::is_retryable,
            |attempt| {
                let handler = handler.clone();
                async move {
                    debug!(attempt, "Install attempt");
                    match with_timeout(timeout, handler.install()).await {
                        Ok(installed) => installed.map_err(HostError::from),
                        Err(elapsed) => Err(HostError::from(elapsed)),
                    }
                }
            },
        )
        .await;

        let Some(mut record) = self.registration.installing.take() else {
            return Err(HostError::State("installing slot emptied during install".into()));
        };

        if let Err(e) = result {
            warn!(worker = id.raw(), error = %e, "Install failed, worker is redundant");
            self.transition(&mut record, WorkerState::Redundant);
            return Err(e);
        }

        self.transition(&mut record, WorkerState::Installed);
        if let Some(previous) = self.registration.waiting.replace(record) {
            self.retire(previous);
        }
        self.workers.insert(
            id,
            HostedWorker {
                handler,
                scope: scope.clone(),
            },
        );

        let activation = if scope.take_skip_waiting() || self.registration.active.is_none() {
            Some(self.activate_waiting().await?)
        } else {
            None
        };

        Ok(InstallReport {
            worker: id,
            activation,
        })
    }

    /// Activate the waiting worker, retiring the current active one.
    pub async fn activate_waiting(&mut self) -> Result<ActivationOutcome, HostError> {
        let Some(mut record) = self.registration.waiting.take() else {
            return Err(HostError::State("no waiting worker".into()));
        };
        let id = record.id;
        let Some((handler, scope)) = self
            .workers
            .get(&id)
            .map(|w| (w.handler.clone(), w.scope.clone()))
        else {
            return Err(HostError::State(format!("worker {} has no handler", id.raw())));
        };

        if let Some(previous) = self.registration.active.take() {
            self.retire(previous);
        }

        self.transition(&mut record, WorkerState::Activating);
        let outcome = handler.activate().await;
        self.transition(&mut record, WorkerState::Activated);
        self.registration.active = Some(record);
        info!(worker = id.raw(), ?outcome, "Worker activated");

        if scope.take_claim() {
            self.claim(id);
        }
        self.drop_unused_handlers();

        Ok(outcome)
    }

    /// Deliver a message to the newest worker.
    ///
    /// A `skipWaiting` request from a waiting worker activates it right away;
    /// pages keep their controller until they navigate again.
    pub async fn post_message(&mut self, data: &str) -> Result<(), HostError> {
        let Some(target) = self.registration.newest().map(|w| w.id) else {
            return Err(HostError::State("no worker to receive the message".into()));
        };
        let Some((handler, scope)) = self
            .workers
            .get(&target)
            .map(|w| (w.handler.clone(), w.scope.clone()))
        else {
            return Err(HostError::State(format!("worker {} has no handler", target.raw())));
        };

        let delivered = handler.message(data).await;

        let is_waiting = self.registration.waiting.as_ref().map(|w| w.id) == Some(target);
        if scope.take_skip_waiting() && is_waiting {
            self.activate_waiting().await?;
        }

        delivered.map_err(HostError::from)
    }

    /// Open a page: the navigation goes through the active worker, which
    /// then controls the page.
    pub async fn navigate(&mut self, url: Url) -> Result<(ClientId, FetchOutcome), HostError> {
        let controller = self.registration.active_id();
        let client = Client {
            id: ClientId::new(),
            url: url.clone(),
            controller,
        };
        let id = client.id;
        self.clients.insert(id, client);

        let outcome = self.dispatch_fetch(id, &Request::get(url)).await?;
        Ok((id, outcome))
    }

    /// Reload a page, picking up the current active worker as controller.
    pub async fn reload(&mut self, client: ClientId) -> Result<FetchOutcome, HostError> {
        let active = self.registration.active_id();
        let Some(page) = self.clients.get_mut(&client) else {
            return Err(HostError::State("unknown client".into()));
        };
        let url = page.url.clone();
        if page.controller != active {
            page.controller = active;
            if let Some(worker) = active {
                self.emit(HostEvent::ControllerChange { client, worker });
            }
        }
        self.drop_unused_handlers();
        self.dispatch_fetch(client, &Request::get(url)).await
    }

    /// Route a page's request through its controller. Uncontrolled pages go
    /// straight to the network.
    pub async fn dispatch_fetch(
        &self,
        client: ClientId,
        request: &Request,
    ) -> Result<FetchOutcome, HostError> {
        let handler = self
            .clients
            .get(&client)
            .and_then(|c| c.controller)
            .and_then(|worker| self.workers.get(&worker))
            .map(|w| w.handler.clone());

        match handler {
            Some(handler) => Ok(handler.fetch(request).await?),
            None => Ok(FetchOutcome::Bypass),
        }
    }

    pub fn controller_of(&self, client: ClientId) -> Option<WorkerId> {
        self.clients.get(&client).and_then(|c| c.controller)
    }

    pub fn close(&mut self, client: ClientId) -> Option<Client> {
        let closed = self.clients.remove(&client);
        self.drop_unused_handlers();
        closed
    }

    fn claim(&mut self, worker: WorkerId) {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                changed.push(client.id);
            }
        }
        for client in changed {
            self.emit(HostEvent::ControllerChange { client, worker });
        }
    }

    fn retire(&mut self, mut record: WorkerRecord) {
        self.transition(&mut record, WorkerState::Redundant);
    }

    /// Forget handlers of workers that are neither registered nor controlling a page.
    fn drop_unused_handlers(&mut self) {
        let live = self.registration.live_ids();
        let controlling: Vec<WorkerId> =
            self.clients.values().filter_map(|c| c.controller).collect();
        self.workers.retain(|id, _| live.contains(id) || controlling.contains(id));
    }

    fn transition(&self, record: &mut WorkerRecord, state: WorkerState) {
        record.set_state(state);
        debug!(worker = record.id.raw(), ?state, "Worker state change");
        self.emit(HostEvent::StateChange {
            worker: record.id,
            state,
        });
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shellcache_common::RetryConfig;
    use shellcache_sw::{
        Fetcher, LifecycleController, Manifest, MemoryCacheStorage, Response, WorkerConfig,
    };
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Origin that fails the first `failures` requests.
    #[derive(Default)]
    struct FlakyOrigin {
        failures: AtomicUsize,
        version: Mutex<String>,
    }

    #[async_trait]
    impl Fetcher for FlakyOrigin {
        async fn fetch(&self, request: &Request) -> shellcache_sw::Result<Response> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SwError::network("connection reset"));
            }
            let version = self.version.lock().unwrap().clone();
            Ok(Response::ok(format!("{}@{}", request.url.path(), version)))
        }
    }

    fn config() -> HostConfig {
        HostConfig {
            worker: WorkerConfig::for_origin("https://app.test").unwrap(),
            install_retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    fn script() -> Url {
        Url::parse("https://app.test/flutter_service_worker.js").unwrap()
    }

    fn manifest(fingerprint: &str) -> Manifest {
        Manifest::new(
            [("/", fingerprint), ("index.html", fingerprint), ("main.dart.js", fingerprint)],
            ["index.html", "main.dart.js"],
        )
    }

    fn builder(
        config: &HostConfig,
        manifest: Manifest,
        storage: &MemoryCacheStorage,
        origin: &Arc<FlakyOrigin>,
    ) -> impl FnOnce(Arc<dyn WorkerScope>) -> Arc<dyn LifecycleHandler> {
        let worker = config.worker.clone();
        let storage = storage.clone();
        let origin = origin.clone();
        move |scope: Arc<dyn WorkerScope>| -> Arc<dyn LifecycleHandler> {
            Arc::new(
                LifecycleController::new(worker, manifest, Arc::new(storage), origin)
                    .with_scope(scope),
            )
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_install_activates_and_claims() {
        let config = config();
        let storage = MemoryCacheStorage::new();
        let origin = Arc::new(FlakyOrigin::default());
        let (mut host, mut rx) = ServiceWorkerHost::new(config.clone());

        let page = Url::parse("https://app.test/").unwrap();
        let (client, before) = host.navigate(page).await.unwrap();
        assert_eq!(before, FetchOutcome::Bypass);

        let report = host
            .install(script(), builder(&config, manifest("h1"), &storage, &origin))
            .await
            .unwrap();

        assert!(matches!(
            report.activation,
            Some(ActivationOutcome::FirstInstall { installed: 2 })
        ));
        assert_eq!(host.registration().active_id(), Some(report.worker));
        assert_eq!(host.controller_of(client), Some(report.worker));

        let events = drain(&mut rx);
        assert!(events.contains(&HostEvent::StateChange {
            worker: report.worker,
            state: WorkerState::Activated
        }));
        assert!(events.contains(&HostEvent::ControllerChange {
            client,
            worker: report.worker
        }));
    }

    #[tokio::test]
    async fn test_install_retries_transient_failures() {
        let config = config();
        let storage = MemoryCacheStorage::new();
        let origin = Arc::new(FlakyOrigin {
            failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let (mut host, _rx) = ServiceWorkerHost::new(config.clone());

        let report = host
            .install(script(), builder(&config, manifest("h1"), &storage, &origin))
            .await
            .unwrap();

        assert!(report.activation.is_some());
    }

    #[tokio::test]
    async fn test_install_gives_up_and_marks_redundant() {
        let config = config();
        let storage = MemoryCacheStorage::new();
        let origin = Arc::new(FlakyOrigin {
            failures: AtomicUsize::new(100),
            ..Default::default()
        });
        let (mut host, mut rx) = ServiceWorkerHost::new(config.clone());

        let result = host
            .install(script(), builder(&config, manifest("h1"), &storage, &origin))
            .await;

        assert!(matches!(result, Err(HostError::Worker(SwError::Network(_)))));
        assert!(host.registration().active.is_none());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            HostEvent::StateChange {
                state: WorkerState::Redundant,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_update_claims_open_pages() {
        let config = config();
        let storage = MemoryCacheStorage::new();
        let origin = Arc::new(FlakyOrigin::default());
        *origin.version.lock().unwrap() = "v1".into();
        let (mut host, _rx) = ServiceWorkerHost::new(config.clone());

        let first = host
            .install(script(), builder(&config, manifest("h1"), &storage, &origin))
            .await
            .unwrap();
        let (client, _) = host
            .navigate(Url::parse("https://app.test/").unwrap())
            .await
            .unwrap();
        assert_eq!(host.controller_of(client), Some(first.worker));

        *origin.version.lock().unwrap() = "v2".into();
        let second = host
            .install(script(), builder(&config, manifest("h2"), &storage, &origin))
            .await
            .unwrap();

        // The new worker claimed the open page on activation.
        assert!(second.activation.is_some());
        assert_eq!(host.controller_of(client), Some(second.worker));

        let main = Request::parse("https://app.test/main.dart.js").unwrap();
        match host.dispatch_fetch(client, &main).await.unwrap() {
            FetchOutcome::Respond(response) => {
                assert_eq!(response.body.as_ref(), b"/main.dart.js@v2");
            }
            FetchOutcome::Bypass => panic!("main.dart.js should be served by the worker"),
        }
    }

    #[tokio::test]
    async fn test_download_offline_message() {
        let config = config();
        let storage = MemoryCacheStorage::new();
        let origin = Arc::new(FlakyOrigin::default());
        let (mut host, _rx) = ServiceWorkerHost::new(config.clone());
        host.install(script(), builder(&config, manifest("h1"), &storage, &origin))
            .await
            .unwrap();

        host.post_message("downloadOffline").await.unwrap();
        host.post_message("somethingElse").await.unwrap();

        let durable = storage.get("flutter-app-cache").await.unwrap();
        assert_eq!(durable.len().await, 3);
    }

    #[tokio::test]
    async fn test_message_without_worker() {
        let (mut host, _rx) = ServiceWorkerHost::new(config());
        assert!(matches!(
            host.post_message("skipWaiting").await,
            Err(HostError::State(_))
        ));
    }
}
