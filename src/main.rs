//! vaultfs server
//!
//! Wires the metadata store, storage policies, file services, task broker
//! and HTTP endpoints together and runs until Ctrl+C.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use vaultfs_api::{AppState, build_router};
use vaultfs_core::Settings;
use vaultfs_core::config::AppConfig;
use vaultfs_core::events::{BroadcastEventBus, DomainEvent};
use vaultfs_core::traits::{EventPublisher, JobEnqueuer};
use vaultfs_database::Store;
use vaultfs_service::{
    DirectLinkService, PathLocker, ThumbnailService, UploadSessionManager, VfsService,
};
use vaultfs_storage::providers::default_providers;
use vaultfs_storage::thumbnail::ThumbnailPipeline;
use vaultfs_storage::{ChunkStaging, PolicyRegistry, UrlSigner};
use vaultfs_worker::jobs::{CleanupJobHandler, MaintenanceJobHandler, ThumbnailJobHandler};
use vaultfs_worker::{Broker, CronScheduler, JobExecutor, WorkerRunner};

/// Pluggable storage and file-lifecycle engine.
#[derive(Debug, Parser)]
#[command(name = "vaultfs-server", version, about)]
struct Cli {
    /// Directory holding `default.toml` and environment overlays.
    #[arg(long, default_value = "config")]
    config_dir: String,
    /// Environment overlay to apply (`config/{env}.toml`).
    #[arg(long, default_value = "development")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config_dir, &cli.env)?;
    init_logging(&config);

    info!(env = %cli.env, "Starting vaultfs v{}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(config).await {
        error!(error = %e, "Server error");
        return Err(e);
    }
    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the configured level.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // ── Metadata store and settings ──────────────────────────────
    let store = Store::connect(&config.database).await?;
    let settings = Arc::new(Settings::new(config.settings.clone()));

    // ── Storage policies ─────────────────────────────────────────
    if config.signing.secret == "change-me" {
        warn!("Signing secret is the built-in default; set signing.secret");
    }
    let signer = Arc::new(UrlSigner::new(
        &config.signing.secret,
        &config.server.public_base_url,
    )?);
    let registry = PolicyRegistry::new(store.policies.clone(), default_providers(signer.clone()));
    registry.bootstrap(&config.storage).await?;
    let staging = ChunkStaging::new(&config.storage.staging_root).await?;

    // ── Events and broker ────────────────────────────────────────
    let bus = Arc::new(BroadcastEventBus::new(1024));
    tokio::spawn(log_events(bus.subscribe()));
    let events: Arc<dyn EventPublisher> = bus;

    let broker = Broker::new(store.jobs.clone(), config.worker.clone());
    let jobs: Arc<dyn JobEnqueuer> = Arc::new(broker.clone());

    // ── Services ─────────────────────────────────────────────────
    let vfs = VfsService::new(
        store.clone(),
        registry.clone(),
        PathLocker::new(),
        events.clone(),
        signer.clone(),
        config.signing.clone(),
    );
    let thumbnails = ThumbnailService::new(
        store.clone(),
        vfs.clone(),
        ThumbnailPipeline::new(settings.clone(), config.thumbnail.clone()),
        signer.clone(),
        jobs.clone(),
        config.signing.clone(),
    );
    let uploads = UploadSessionManager::new(
        store.clone(),
        vfs.clone(),
        staging,
        events.clone(),
        jobs.clone(),
        config.upload.clone(),
    );
    let links = DirectLinkService::new(store.clone(), vfs.clone(), signer.clone());

    // ── Worker pool and cron ─────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = if config.worker.enabled {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(ThumbnailJobHandler::new(thumbnails.clone())));
        executor.register(Arc::new(CleanupJobHandler::new(
            store.clone(),
            vfs.clone(),
            uploads,
            &config.worker,
        )));
        executor.register(Arc::new(MaintenanceJobHandler::new(
            store.clone(),
            registry.clone(),
        )));

        let runner = WorkerRunner::new(broker.clone(), Arc::new(executor));
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        let cron = CronScheduler::new(jobs.clone()).await?;
        cron.register_default_tasks(&config.worker.cron).await?;
        cron.start().await?;
        Some((handle, cron))
    } else {
        info!("Task broker disabled");
        None
    };

    // ── HTTP ─────────────────────────────────────────────────────
    let app = build_router(AppState {
        vfs,
        thumbnails,
        links,
        signer,
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(address = %config.server.bind_address, "vaultfs listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some((handle, cron)) = worker {
        cron.shutdown().await?;
        match handle.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "Task broker crashed"),
        }
    }

    info!("vaultfs stopped");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<DomainEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(actor_id = ?event.actor_id, event = ?event.payload, "File event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
