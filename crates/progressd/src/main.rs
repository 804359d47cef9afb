//! progressd - progression ledger daemon
//!
//! Serves the award pipeline over HTTP and reconciles with the remote
//! store in the background.

use anyhow::{Context, Result};
use progressd::config::{Config, RemoteKind};
use progressd::hooks;
use progressd::remote::{HttpRemote, MemoryRemote, RemoteStore};
use progressd::server::{self, AppState};
use progressd::store::ProgressStore;
use progressd::sync::{SyncWorker, TRIGGER_CAPACITY};
use progressd::ProgressionService;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("progressd v{} starting", progress_shared::VERSION);

    let table = Arc::new(config.level_table().context("Failed to load level table")?);
    info!("  Level table: {} levels", table.max_level());

    tokio::fs::create_dir_all(&config.daemon.data_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.daemon.data_dir.display()))?;
    let store = ProgressStore::open(config.db_path()).await?;
    info!("  Database: {}", store.path().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);

    let remote = build_remote(&config, Arc::clone(&table))?;
    let mut service = ProgressionService::new(&config, Arc::clone(&table), store);
    if remote.is_some() {
        service = service.with_sync_trigger(trigger_tx);
    }
    let service = Arc::new(service);

    let logger = hooks::spawn_logger(service.hub(), shutdown_rx.clone());

    let mut state = AppState::new(Arc::clone(&service));
    let mut sync_task = None;
    if let Some(remote) = remote {
        let worker = Arc::new(SyncWorker::new(
            Arc::clone(&service),
            remote,
            config.sync.retry_policy(),
            config.sync.timeout(),
            config.sync.interval(),
        ));
        sync_task = Some(tokio::spawn(
            Arc::clone(&worker).run(shutdown_rx.clone(), trigger_rx),
        ));
        state = state.with_sync(worker);
    }

    info!("progressd ready");
    server::run(state, &config.daemon.listen_addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutting down gracefully");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    let _ = logger.await;
    service.close_all().await;

    info!("progressd stopped");
    Ok(())
}

fn build_remote(
    config: &Config,
    table: Arc<progress_shared::LevelTable>,
) -> Result<Option<Arc<dyn RemoteStore>>> {
    if !config.sync.is_active() {
        info!("  Remote sync disabled");
        return Ok(None);
    }

    let remote: Arc<dyn RemoteStore> = match config.sync.remote {
        RemoteKind::None => return Ok(None),
        RemoteKind::Memory => Arc::new(MemoryRemote::new(table)),
        RemoteKind::Http => {
            let url = config
                .sync
                .remote_url
                .as_deref()
                .context("sync.remote = \"http\" requires sync.remote_url")?;
            Arc::new(HttpRemote::new(url, config.sync.timeout())?)
        }
    };
    info!("  Remote sync via {}", remote.name());
    Ok(Some(remote))
}
