//! `shellcache` command line.
//!
//! ## Usage
//!
//! ```bash
//! # Check a manifest (JSON, or the generated worker script)
//! shellcache validate build/web/flutter_service_worker.js
//!
//! # Install and activate against a live origin, then cache everything
//! shellcache warm --manifest build/web/flutter_service_worker.js \
//!     --origin http://localhost:8080 --offline --log-format json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shellcache_common::{init_logging, LogConfig, LogFormat};
use shellcache_host::{HostConfig, HostEvent, ServiceWorkerHost, WorkerId};
use shellcache_net::HttpFetcher;
use shellcache_sw::{
    ActivationOutcome, CacheStorage, LifecycleController, LifecycleHandler, Manifest,
    MemoryCacheStorage, WorkerConfig, WorkerScope,
};
use tracing::info;

/// Script URL the worker is registered under.
const WORKER_SCRIPT: &str = "flutter_service_worker.js";

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Offline cache manager for web application shells", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a resource manifest for consistency
    Validate {
        /// Manifest file (.json, or the .js worker script)
        manifest: PathBuf,
    },

    /// Install and activate the worker against a live origin
    Warm {
        /// Manifest file (.json, or the .js worker script)
        #[arg(short, long)]
        manifest: PathBuf,
        /// Application origin, e.g. http://localhost:8080
        #[arg(short, long)]
        origin: String,
        /// Host configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Also fetch every remaining manifest resource
        #[arg(long)]
        offline: bool,
    },
}

#[derive(Serialize)]
struct ValidateReport {
    resources: usize,
    core: usize,
}

#[derive(Serialize)]
struct WarmReport {
    origin: String,
    worker: WorkerId,
    activation: Option<ActivationReport>,
    offline: bool,
    regions: Vec<RegionReport>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ActivationReport {
    FirstInstall {
        installed: usize,
    },
    Upgraded {
        retained: usize,
        pruned: usize,
        installed: usize,
    },
    Recovered {
        reason: String,
    },
}

impl From<ActivationOutcome> for ActivationReport {
    fn from(outcome: ActivationOutcome) -> Self {
        match outcome {
            ActivationOutcome::FirstInstall { installed } => Self::FirstInstall { installed },
            ActivationOutcome::Upgraded {
                retained,
                pruned,
                installed,
            } => Self::Upgraded {
                retained,
                pruned,
                installed,
            },
            ActivationOutcome::Recovered { reason } => Self::Recovered { reason },
        }
    }
}

#[derive(Serialize)]
struct RegionReport {
    name: String,
    entries: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::for_verbosity(cli.verbose, cli.log_format));

    match cli.command {
        Commands::Validate { manifest } => validate(&manifest),
        Commands::Warm {
            manifest,
            origin,
            config,
            offline,
        } => warm(&manifest, &origin, config.as_deref(), offline).await,
    }
}

fn load_manifest(path: &std::path::Path) -> Result<Manifest> {
    let manifest = Manifest::load(path)
        .with_context(|| format!("loading manifest {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    Ok(manifest)
}

fn validate(path: &std::path::Path) -> Result<()> {
    let manifest = load_manifest(path)?;
    let report = ValidateReport {
        resources: manifest.len(),
        core: manifest.core().len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn warm(
    manifest_path: &std::path::Path,
    origin: &str,
    config_path: Option<&std::path::Path>,
    offline: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    config.worker.origin = WorkerConfig::for_origin(origin)?.origin;

    let manifest = load_manifest(manifest_path)?;
    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);
    let storage = MemoryCacheStorage::new();
    let script_url = config
        .worker
        .origin
        .join(WORKER_SCRIPT)
        .context("building worker script URL")?;

    info!(origin = %config.worker.origin, resources = manifest.len(), "Warming cache");

    let worker_config = config.worker.clone();
    let worker_storage = storage.clone();
    let (mut host, mut events) = ServiceWorkerHost::new(config.clone());
    let installed = host
        .install(script_url, move |scope: Arc<dyn WorkerScope>| -> Arc<dyn LifecycleHandler> {
            Arc::new(
                LifecycleController::new(worker_config, manifest, Arc::new(worker_storage), fetcher)
                    .with_scope(scope),
            )
        })
        .await
        .context("installing worker")?;

    if offline {
        host.post_message("downloadOffline")
            .await
            .context("downloading resources for offline use")?;
    }

    while let Ok(event) = events.try_recv() {
        match event {
            HostEvent::StateChange { worker, state } => {
                info!(worker = worker.raw(), ?state, "Worker state")
            }
            HostEvent::ControllerChange { client, worker } => {
                info!(?client, worker = worker.raw(), "Controller change")
            }
        }
    }

    let mut regions = Vec::new();
    for name in storage.keys().await? {
        let entries = match storage.get(&name).await {
            Some(cache) => cache.len().await,
            None => 0,
        };
        regions.push(RegionReport { name, entries });
    }

    let report = WarmReport {
        origin: config.worker.origin_str(),
        worker: installed.worker,
        activation: installed.activation.map(ActivationReport::from),
        offline,
        regions,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
